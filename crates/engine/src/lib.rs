#![deny(unsafe_code, rust_2018_idioms)]

//! Query planning and execution against a composed federated schema.
//!
//! The engine is pure given a [`composition::FederatedSchema`]: `prepare`
//! turns an operation into a [`plan::Plan`], `execute` runs the plan over
//! the subgraph transports and stitches the partial results into one
//! response. Lifecycle (composition, polling, hot swap) lives in the
//! `gateway` crate.

mod error;
mod execute;
mod plan;
mod prepare;
mod response;

pub use self::{
    error::PrepareError,
    execute::{execute, subscribe, Collectors, ExecutionContext, SubgraphHandle},
    plan::{EntityFetch, Plan, RootKind, Step, StepId},
    prepare::{prepare, PreparedOperation},
    response::{GraphqlError, PathSegment, Response},
};

pub use composition::OperationKind;
