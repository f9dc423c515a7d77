#![deny(unsafe_code, rust_2018_idioms)]

//! The federated gateway: service registry, schema lifecycle and the public
//! execution entry points.
//!
//! A [`Gateway`] owns a set of subgraph clients, composes their SDLs into a
//! [`composition::FederatedSchema`], and keeps that schema fresh: mandatory
//! subgraphs that failed at startup are retried, healthy ones are polled for
//! schema changes, and a dynamic services provider can grow or shrink the
//! set at runtime. Every successful recomposition hot-swaps the schema
//! atomically; in-flight operations finish against the schema they started
//! with.

mod config;
mod error;
mod gateway;
mod refresh;
mod registry;

pub use self::{
    config::{
        BoxError, GatewayConfig, GatewayHooks, Request, ResolutionHook, SchemaReplaceHook,
        ServiceConfig, ServiceSource, ServicesProvider,
    },
    error::GatewayError,
    gateway::Gateway,
    registry::ServiceStatus,
};

pub use engine::{Collectors, GraphqlError, Response};
