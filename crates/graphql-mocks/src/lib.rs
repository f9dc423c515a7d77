//! Federation-capable mock subgraphs for gateway tests.
//!
//! Each schema is a real async-graphql federation subgraph: it serves
//! `_service { sdl }`, resolves `_entities`, accepts batched array bodies
//! and speaks `graphql-transport-ws` for subscriptions. Servers bind an
//! ephemeral port by default, or a fixed port for tests that bring a
//! service up late.

mod post;
mod products;
mod server;
mod state;
mod user;
mod ws;

pub use self::{
    post::PostSchema,
    products::ProductsSchema,
    server::MockGraphQlServer,
    state::StateMutationSchema,
    user::{UserSchema, UserWithLastNameSchema},
};

use futures_util::stream::BoxStream;

/// Dynamic dispatch over the mock schemas, so one server can swap what it
/// serves at runtime.
#[async_trait::async_trait]
pub trait Schema: Send + Sync {
    async fn execute(
        &self,
        headers: Vec<(String, String)>,
        request: async_graphql::Request,
    ) -> async_graphql::Response;

    fn execute_stream(
        &self,
        request: async_graphql::Request,
    ) -> BoxStream<'static, async_graphql::Response>;

    fn sdl(&self) -> String;
}
