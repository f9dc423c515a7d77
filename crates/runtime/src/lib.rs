#![deny(unsafe_code, rust_2018_idioms)]

//! Transport contract between the execution engine and the outside world.
//!
//! The engine only ever talks to subgraphs through [`fetch::GraphqlTransport`];
//! the native reqwest/WebSocket implementation lives in `runtime-local`, and
//! tests plug in in-memory doubles.

pub mod fetch;
pub mod retry;
pub mod secure_json;
