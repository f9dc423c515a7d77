use async_graphql::{EmptyMutation, EmptySubscription, Object, SDLExportOptions, SimpleObject, ID};
use futures_util::stream::BoxStream;

#[derive(Clone, SimpleObject)]
struct User {
    id: ID,
    name: String,
}

fn user(id: &str) -> Option<User> {
    match id {
        "u1" => Some(User {
            id: ID::from("u1"),
            name: "John".to_owned(),
        }),
        "u2" => Some(User {
            id: ID::from("u2"),
            name: "Jane".to_owned(),
        }),
        _ => None,
    }
}

struct Query;

#[Object]
impl Query {
    async fn me(&self) -> User {
        user("u1").expect("u1 exists")
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, id: ID) -> Option<User> {
        user(&id)
    }
}

/// The `user` subgraph: `me`, `User @key(fields: "id")`.
pub struct UserSchema;

impl UserSchema {
    fn schema() -> async_graphql::Schema<Query, EmptyMutation, EmptySubscription> {
        async_graphql::Schema::build(Query, EmptyMutation, EmptySubscription)
            .enable_federation()
            .finish()
    }
}

#[async_trait::async_trait]
impl super::Schema for UserSchema {
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

// The same service after a deploy that added `lastName`, for schema-change
// polling tests.

#[derive(Clone, SimpleObject)]
#[graphql(name = "User")]
struct UserV2 {
    id: ID,
    name: String,
    last_name: String,
}

fn user_v2(id: &str) -> Option<UserV2> {
    match id {
        "u1" => Some(UserV2 {
            id: ID::from("u1"),
            name: "John".to_owned(),
            last_name: "Doe".to_owned(),
        }),
        "u2" => Some(UserV2 {
            id: ID::from("u2"),
            name: "Jane".to_owned(),
            last_name: "Doe".to_owned(),
        }),
        _ => None,
    }
}

struct QueryV2;

#[Object(name = "Query")]
impl QueryV2 {
    async fn me(&self) -> UserV2 {
        user_v2("u1").expect("u1 exists")
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, id: ID) -> Option<UserV2> {
        user_v2(&id)
    }
}

pub struct UserWithLastNameSchema;

impl UserWithLastNameSchema {
    fn schema() -> async_graphql::Schema<QueryV2, EmptyMutation, EmptySubscription> {
        async_graphql::Schema::build(QueryV2, EmptyMutation, EmptySubscription)
            .enable_federation()
            .finish()
    }
}

#[async_trait::async_trait]
impl super::Schema for UserWithLastNameSchema {
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
