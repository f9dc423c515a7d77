use std::sync::{Arc, Mutex};

use async_graphql::{EmptySubscription, Object, SDLExportOptions};
use futures_util::stream::BoxStream;

#[derive(Clone, Default)]
struct State {
    value: Arc<Mutex<i64>>,
}

struct Query {
    state: State,
}

#[Object]
impl Query {
    async fn value(&self) -> i64 {
        *self.state.value.lock().unwrap()
    }
}

struct Mutation {
    state: State,
}

#[Object]
impl Mutation {
    async fn set(&self, val: i64) -> i64 {
        *self.state.value.lock().unwrap() = val;
        val
    }

    async fn multiply(&self, by: i64) -> i64 {
        let mut value = self.state.value.lock().unwrap();
        *value *= by;
        *value
    }

    async fn faillible(&self) -> async_graphql::Result<i64> {
        Err("This mutation always fails".into())
    }
}

/// A stateful single-service schema whose mutations only make sense when
/// executed strictly in source order.
#[derive(Default)]
pub struct StateMutationSchema {
    state: State,
}

impl StateMutationSchema {
    fn schema(&self) -> async_graphql::Schema<Query, Mutation, EmptySubscription> {
        async_graphql::Schema::build(
            Query {
                state: self.state.clone(),
            },
            Mutation {
                state: self.state.clone(),
            },
            EmptySubscription,
        )
        .enable_federation()
        .finish()
    }
}

#[async_trait::async_trait]
impl super::Schema for StateMutationSchema {
    async fn execute(
        &self,
        _headers: Vec<(String, String)>,
        request: async_graphql::Request,
    ) -> async_graphql::Response {
        self.schema().execute(request).await
    }

    fn execute_stream(
        &self,
        request: async_graphql::Request,
    ) -> BoxStream<'static, async_graphql::Response> {
        Box::pin(self.schema().execute_stream(request))
    }

    fn sdl(&self) -> String {
        self.schema()
            .sdl_with_options(SDLExportOptions::new().federation())
    }
}
