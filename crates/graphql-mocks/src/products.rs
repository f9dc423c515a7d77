use async_graphql::{
    EmptyMutation, EmptySubscription, Object, SDLExportOptions, SimpleObject, Union, ID,
};
use futures_util::stream::BoxStream;

#[derive(Clone, SimpleObject)]
struct Book {
    id: ID,
    #[graphql(name = "type")]
    kind: String,
    name: String,
    pages: i32,
}

#[derive(Clone, SimpleObject)]
struct Movie {
    id: ID,
    #[graphql(name = "type")]
    kind: String,
    name: String,
    minutes: i32,
}

#[derive(Clone, Union)]
enum Product {
    Book(Book),
    Movie(Movie),
}

struct Query;

#[Object]
impl Query {
    async fn products(&self) -> Vec<Product> {
        vec![
            Product::Book(Book {
                id: ID::from("b1"),
                kind: "book".to_owned(),
                name: "A Thousand Plateaus".to_owned(),
                pages: 645,
            }),
            Product::Movie(Movie {
                id: ID::from("m1"),
                kind: "movie".to_owned(),
                name: "Stalker".to_owned(),
                minutes: 162,
            }),
        ]
    }
}

/// A single-service subgraph with an abstract `products` list, for fragment
/// passthrough tests.
pub struct ProductsSchema;

impl ProductsSchema {
    fn schema() -> async_graphql::Schema<Query, EmptyMutation, EmptySubscription> {
        async_graphql::Schema::build(Query, EmptyMutation, EmptySubscription)
            .enable_federation()
            .finish()
    }
}

#[async_trait::async_trait]
impl super::Schema for ProductsSchema {
    async fn execute(
        &self,
        _headers: Vec<(String, String)>,
        request: async_graphql::Request,
    ) -> async_graphql::Response {
        Self::schema().execute(request).await
    }

    fn execute_stream(
        &self,
        request: async_graphql::Request,
    ) -> BoxStream<'static, async_graphql::Response> {
        Box::pin(Self::schema().execute_stream(request))
    }

    fn sdl(&self) -> String {
        Self::schema().sdl_with_options(SDLExportOptions::new().federation())
    }
}
