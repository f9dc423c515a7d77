use async_graphql::{
    ComplexObject, EmptyMutation, Object, SDLExportOptions, SimpleObject, Subscription, ID,
};
use futures::Stream;
use futures_util::stream::BoxStream;

#[derive(Clone, SimpleObject)]
#[graphql(complex)]
struct Post {
    pid: ID,
    title: String,
    #[graphql(skip)]
    author_id: Option<&'static str>,
}

#[ComplexObject]
impl Post {
    async fn author(&self) -> Option<User> {
        self.author_id.map(|id| User { id: ID::from(id) })
    }
}

fn posts() -> Vec<Post> {
    vec![
        Post {
            pid: ID::from("p1"),
            title: "Post 1".to_owned(),
            author_id: Some("u1"),
        },
        Post {
            pid: ID::from("p2"),
            title: "Post 2".to_owned(),
            author_id: Some("u2"),
        },
        Post {
            pid: ID::from("p3"),
            title: "Post 3".to_owned(),
            author_id: Some("u1"),
        },
        Post {
            pid: ID::from("p4"),
            title: "Post 4".to_owned(),
            author_id: None,
        },
    ]
}

struct User {
    id: ID,
}

#[Object(extends)]
impl User {
    #[graphql(external)]
    async fn id(&self) -> &ID {
        &self.id
    }

    async fn posts(&self, count: Option<usize>) -> Vec<Post> {
        let mine: Vec<Post> = posts()
            .into_iter()
            .filter(|post| post.author_id == Some(self.id.as_str()))
            .collect();
        match count {
            Some(count) => mine.into_iter().take(count).collect(),
            None => mine,
        }
    }
}

struct Query;

#[Object]
impl Query {
    async fn top_posts(&self, count: Option<usize>) -> Vec<Post> {
        match count {
            Some(count) => posts().into_iter().take(count).collect(),
            None => posts(),
        }
    }

    #[graphql(entity)]
    async fn find_user_by_id(&self, id: ID) -> User {
        User { id }
    }

    #[graphql(entity)]
    async fn find_post_by_pid(&self, pid: ID) -> Option<Post> {
        posts().into_iter().find(|post| post.pid == pid)
    }
}

struct SubscriptionRoot;

#[Subscription(name = "Subscription")]
impl SubscriptionRoot {
    async fn post_added(&self) -> impl Stream<Item = Post> {
        futures::stream::iter(posts().into_iter().take(2))
    }
}

/// The `post` subgraph: `Post` entity, `topPosts`, the `User.posts`
/// extension and a `postAdded` subscription.
pub struct PostSchema;

impl PostSchema {
    fn schema() -> async_graphql::Schema<Query, EmptyMutation, SubscriptionRoot> {
        async_graphql::Schema::build(Query, EmptyMutation, SubscriptionRoot)
            .enable_federation()
            .enable_subscription_in_federation()
            .finish()
    }
}

#[async_trait::async_trait]
impl super::Schema for PostSchema {
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
