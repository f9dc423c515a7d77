use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use composition::{compose, Subgraphs};
use engine::{execute, prepare, ExecutionContext, SubgraphHandle};
use futures_util::stream::BoxStream;
use runtime::fetch::{
    FetchError, FetchResult, GraphqlTransport, SubgraphRequest, SubgraphResponse,
};
use serde_json::{json, Value};

const USER_SDL: &str = r#"
    type Query {
        me: User
    }

    type User @key(fields: "id") {
        id: ID!
        name: String
    }
"#;

const POST_SDL: &str = r#"
    type Post @key(fields: "pid") {
        pid: ID!
        title: String
        author: User
    }

    type Query {
        topPosts(count: Int): [Post]
    }

    extend type User @key(fields: "id") {
        id: ID! @external
        posts(count: Int): [Post]
    }
"#;

/// In-memory transport: records every request and answers from a closure.
struct MockService {
    name: &'static str,
    log: Arc<Mutex<Vec<(String, Value)>>>,
    respond: Box<dyn Fn(&SubgraphRequest) -> FetchResult<SubgraphResponse> + Send + Sync>,
}

#[async_trait::async_trait]
impl GraphqlTransport for MockService {
    async fn execute(&self, request: SubgraphRequest) -> FetchResult<SubgraphResponse> {
        self.log
            .lock()
            .unwrap()
            .push((self.name.to_owned(), request.variables.clone()));
        (self.respond)(&request)
    }

    async fn subscribe(
        &self,
        _request: SubgraphRequest,
    ) -> FetchResult<BoxStream<'static, FetchResult<Value>>> {
        Err(FetchError::transport("subscriptions not mocked"))
    }
}

fn ok(value: Value) -> FetchResult<SubgraphResponse> {
    Ok(SubgraphResponse::from_value(
        Some(http::StatusCode::OK),
        value,
    ))
}

struct Fixture {
    schema: composition::FederatedSchema,
    subgraphs: HashMap<String, SubgraphHandle>,
    log: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Fixture {
    fn new(
        sdls: &[(&'static str, &str)],
        responders: Vec<(
            &'static str,
            Box<dyn Fn(&SubgraphRequest) -> FetchResult<SubgraphResponse> + Send + Sync>,
        )>,
    ) -> Self {
        let mut subgraph_sdls = Subgraphs::default();
        for (name, sdl) in sdls {
            subgraph_sdls.ingest_sdl(name, sdl).unwrap();
        }
        let schema = compose(&subgraph_sdls).into_result().unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let subgraphs = responders
            .into_iter()
            .map(|(name, respond)| {
                let handle = SubgraphHandle {
                    name: name.to_owned(),
                    transport: Arc::new(MockService {
                        name,
                        log: Arc::clone(&log),
                        respond,
                    }),
                    collect_status_codes: false,
                    collect_extensions: false,
                };
                (name.to_owned(), handle)
            })
            .collect();

        Fixture {
            schema,
            subgraphs,
            log,
        }
    }

    async fn run(&self, query: &str) -> engine::Response {
        self.run_with_variables(query, serde_json::Map::new()).await
    }

    async fn run_with_variables(
        &self,
        query: &str,
        variables: serde_json::Map<String, Value>,
    ) -> engine::Response {
        let prepared = prepare(&self.schema, query, None).unwrap();
        let headers = http::HeaderMap::new();
        let ctx = ExecutionContext {
            schema: &self.schema,
            subgraphs: &self.subgraphs,
            headers: &headers,
        };
        let (response, _) = execute(ctx, &prepared, &variables).await;
        response
    }

    fn calls(&self, service: &str) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, variables)| variables.clone())
            .collect()
    }
}

fn user_and_post() -> Fixture {
    Fixture::new(
        &[("user", USER_SDL), ("post", POST_SDL)],
        vec![
            (
                "user",
                Box::new(|request| {
                    // Answer under whichever response key the gateway asked
                    // with.
                    let key = if request.query.contains("user: me") {
                        "user"
                    } else {
                        "me"
                    };
                    let mut data = serde_json::Map::new();
                    data.insert(
                        key.to_owned(),
                        json!({"id": "u1", "name": "John", "__typename": "User"}),
                    );
                    ok(json!({"data": data}))
                }),
            ),
            (
                "post",
                Box::new(|request| {
                    let count = request
                        .variables
                        .pointer("/representations")
                        .and_then(Value::as_array)
                        .map(Vec::len)
                        .unwrap_or_default();
                    let entities: Vec<Value> = (0..count)
                        .map(|_| json!({"posts": [{"pid": "p1"}]}))
                        .collect();
                    ok(json!({"data": {"_entities": entities}}))
                }),
            ),
        ],
    )
}

#[tokio::test]
async fn stitches_a_two_service_join() {
    let fixture = user_and_post();
    let response = fixture
        .run("{ user: me { id name posts(count: 1) { pid } } }")
        .await;

    insta::assert_json_snapshot!(response, @r###"
    {
      "data": {
        "user": {
          "id": "u1",
          "name": "John",
          "posts": [
            {
              "pid": "p1"
            }
          ]
        }
      }
    }
    "###);
}

#[tokio::test]
async fn injected_key_fields_are_stripped_from_the_response() {
    let fixture = user_and_post();
    let response = fixture.run("{ me { name posts(count: 1) { pid } } }").await;

    let me = response
        .data
        .as_ref()
        .and_then(|data| data.get("me"))
        .unwrap();
    assert!(me.get("id").is_none());
    assert!(me.get("__typename").is_none());
    assert_eq!(me.get("name"), Some(&json!("John")));
}

#[tokio::test]
async fn identical_entities_are_looked_up_once() {
    let fixture = Fixture::new(
        &[("user", USER_SDL), ("post", POST_SDL)],
        vec![
            (
                "user",
                Box::new(|request| {
                    let representations = request
                        .variables
                        .pointer("/representations")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let entities: Vec<Value> = representations
                        .iter()
                        .map(|_| json!({"name": "John"}))
                        .collect();
                    ok(json!({"data": {"_entities": entities}}))
                }),
            ),
            (
                "post",
                Box::new(|_| {
                    ok(json!({
                        "data": {
                            "topPosts": [
                                {"author": {"id": "u1", "__typename": "User"}},
                                {"author": {"id": "u1", "__typename": "User"}},
                            ]
                        }
                    }))
                }),
            ),
        ],
    );

    let response = fixture
        .run("{ topPosts(count: 2) { author { name } } }")
        .await;

    assert!(response.errors.is_empty());
    let authors = response
        .data
        .as_ref()
        .and_then(|data| data.pointer("/topPosts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap();
    assert_eq!(authors.len(), 2);
    for post in &authors {
        assert_eq!(post.pointer("/author/name"), Some(&json!("John")));
    }

    // Both paths referred to (User, u1): a single lookup with a single,
    // de-duplicated representation.
    let lookups = fixture.calls("user");
    assert_eq!(lookups.len(), 1);
    let representations = lookups[0]
        .pointer("/representations")
        .and_then(Value::as_array)
        .unwrap()
        .clone();
    assert_eq!(representations.len(), 1);
}

#[tokio::test]
async fn mutations_run_in_source_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_a = Arc::clone(&order);
    let order_b = Arc::clone(&order);

    let fixture = Fixture::new(
        &[
            ("a", "type Query { a: Int } type Mutation { bump: Int }"),
            ("b", "type Query { b: Int } type Mutation { reset: Int }"),
        ],
        vec![
            (
                "a",
                Box::new(move |_| {
                    order_a.lock().unwrap().push("a");
                    ok(json!({"data": {"first": 1, "third": 3}}))
                }),
            ),
            (
                "b",
                Box::new(move |_| {
                    order_b.lock().unwrap().push("b");
                    ok(json!({"data": {"second": 2}}))
                }),
            ),
        ],
    );

    let response = fixture
        .run("mutation { first: bump second: reset third: bump }")
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn transport_failures_surface_as_errors_and_skip_dependents() {
    let fixture = Fixture::new(
        &[("user", USER_SDL), ("post", POST_SDL)],
        vec![
            (
                "user",
                Box::new(|_| {
                    ok(json!({
                        "data": {"me": {"id": "u1", "name": "John", "__typename": "User"}}
                    }))
                }),
            ),
            (
                "post",
                Box::new(|_| Err(FetchError::transport("connection refused"))),
            ),
        ],
    );

    let response = fixture.run("{ me { name posts(count: 1) { pid } } }").await;

    insta::assert_json_snapshot!(response, @r###"
    {
      "data": {
        "me": {
          "name": "John",
          "posts": null
        }
      },
      "errors": [
        {
          "message": "connection refused",
          "path": [
            "me"
          ]
        }
      ]
    }
    "###);
}

#[tokio::test]
async fn errors_without_data_fail_the_step_and_its_dependents() {
    let fixture = Fixture::new(
        &[("user", USER_SDL), ("post", POST_SDL)],
        vec![
            (
                "user",
                Box::new(|_| ok(json!({"errors": [{"message": "boom", "path": ["me"]}]}))),
            ),
            (
                "post",
                Box::new(|_| ok(json!({"data": {"_entities": []}}))),
            ),
        ],
    );

    let response = fixture.run("{ me { name posts(count: 1) { pid } } }").await;

    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "boom");
    assert_eq!(
        response.data.as_ref().unwrap().get("me"),
        Some(&Value::Null),
    );
    // The entity jump never ran.
    assert!(fixture.calls("post").is_empty());
}

#[tokio::test]
async fn null_parents_produce_no_entity_lookups() {
    let fixture = Fixture::new(
        &[("user", USER_SDL), ("post", POST_SDL)],
        vec![
            (
                "user",
                Box::new(|request| {
                    let representations = request
                        .variables
                        .pointer("/representations")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let entities: Vec<Value> = representations
                        .iter()
                        .map(|_| json!({"name": "John"}))
                        .collect();
                    ok(json!({"data": {"_entities": entities}}))
                }),
            ),
            (
                "post",
                Box::new(|_| {
                    ok(json!({
                        "data": {
                            "topPosts": [
                                {"pid": "p1", "author": {"id": "u1", "__typename": "User"}},
                                {"pid": "p2", "author": null},
                            ]
                        }
                    }))
                }),
            ),
        ],
    );

    let response = fixture
        .run("{ topPosts(count: 2) { pid author { name } } }")
        .await;

    assert!(response.errors.is_empty());
    insta::assert_json_snapshot!(response.data.unwrap(), @r###"
    {
      "topPosts": [
        {
          "pid": "p1",
          "author": {
            "name": "John"
          }
        },
        {
          "pid": "p2",
          "author": null
        }
      ]
    }
    "###);

    let lookups = fixture.calls("user");
    assert_eq!(lookups.len(), 1);
    assert_eq!(
        lookups[0]
            .pointer("/representations")
            .and_then(Value::as_array)
            .unwrap()
            .len(),
        1,
    );
}

#[tokio::test]
async fn variables_are_forwarded_bit_exact() {
    let fixture = user_and_post();
    let mut variables = serde_json::Map::new();
    variables.insert("c".to_owned(), json!(1));
    variables.insert("unused".to_owned(), json!("nope"));

    let response = fixture
        .run_with_variables(
            "query($c: Int, $unused: String) { me { posts(count: $c) { pid } } }",
            variables,
        )
        .await;

    assert!(response.errors.is_empty());
    let entity_call = &fixture.calls("post")[0];
    assert_eq!(entity_call.get("c"), Some(&json!(1)));
    assert!(entity_call.get("unused").is_none());
}
