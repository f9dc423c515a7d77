#![deny(unsafe_code, rust_2018_idioms)]

//! The native subgraph transport: pooled reqwest clients, optional query
//! batching, and persistent WebSocket connections for subscriptions.

mod batch;
mod client;
mod headers;
mod ws;

pub use self::{
    client::{HeaderRewriter, SubgraphClient, SubgraphClientConfig},
    headers::forwarded_headers,
};
