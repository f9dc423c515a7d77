use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::StreamExt;
use gateway::{
    Gateway, GatewayConfig, Request, ServiceConfig, ServiceSource, ServicesProvider,
};
use graphql_mocks::{
    MockGraphQlServer, PostSchema, ProductsSchema, StateMutationSchema, UserSchema,
    UserWithLastNameSchema,
};
use integration_tests::{free_port, runtime};
use serde_json::json;

fn service(name: &str, server: &MockGraphQlServer) -> ServiceConfig {
    ServiceConfig::new(name, server.url().parse().unwrap())
}

#[test]
fn two_service_join() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post = MockGraphQlServer::new(PostSchema).await;

        let gateway = Gateway::new(GatewayConfig::new(vec![
            service("user", &user),
            service("post", &post),
        ]))
        .await
        .unwrap();

        let response = gateway
            .execute(Request::new(
                "{ user: me { id name posts(count: 1) { pid } } }",
            ))
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

        gateway.close().await;
    });
}

#[test]
fn mandatory_service_down_then_up() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post_port = free_port().await;

        let replaced = Arc::new(AtomicUsize::new(0));
        let replaced_in_hook = Arc::clone(&replaced);

        let mut config = GatewayConfig::new(vec![
            service("user", &user),
            ServiceConfig::new(
                "post",
                format!("http://127.0.0.1:{post_port}/").parse().unwrap(),
            )
            .mandatory(),
        ]);
        config.retry_interval = Duration::from_millis(100);
        config.retry_count = 30;
        config.hooks.on_schema_replace = Some(Arc::new(move |_schema| {
            replaced_in_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let gateway = Gateway::new(config).await.unwrap();

        let query = "{ me { id name posts(count: 1) { pid } } }";
        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "posts" on type "User"."#,
        );

        // The service comes up within the retry window.
        let _post = MockGraphQlServer::new_on_port(PostSchema, post_port).await;
        tokio::time::sleep(Duration::from_millis(800)).await;

        let response = gateway.execute(Request::new(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            Some(json!({
                "me": {"id": "u1", "name": "John", "posts": [{"pid": "p1"}]}
            })),
        );
        assert_eq!(replaced.load(Ordering::SeqCst), 1);

        gateway.close().await;
    });
}

#[test]
fn non_mandatory_failure_is_never_retried() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post_port = free_port().await;

        let replaced = Arc::new(AtomicUsize::new(0));
        let replaced_in_hook = Arc::clone(&replaced);

        let mut config = GatewayConfig::new(vec![
            service("user", &user),
            ServiceConfig::new(
                "post",
                format!("http://127.0.0.1:{post_port}/").parse().unwrap(),
            ),
        ]);
        config.retry_interval = Duration::from_millis(50);
        config.hooks.on_schema_replace = Some(Arc::new(move |_schema| {
            replaced_in_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let gateway = Gateway::new(config).await.unwrap();

        let query = "{ me { posts(count: 1) { pid } } }";
        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "posts" on type "User"."#,
        );

        // Even with the service up, nothing brings it back: no retries were
        // scheduled and polling is off.
        let _post = MockGraphQlServer::new_on_port(PostSchema, post_port).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "posts" on type "User"."#,
        );
        assert_eq!(replaced.load(Ordering::SeqCst), 0);

        gateway.close().await;
    });
}

#[test]
fn polling_detects_a_schema_change() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;

        let config = GatewayConfig::new(vec![service("user", &user)])
            .with_polling_interval(Duration::from_millis(100));
        let gateway = Gateway::new(config).await.unwrap();

        let query = "{ me { lastName } }";
        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "lastName" on type "User"."#,
        );

        // The subgraph deploys a new field.
        user.swap_schema(UserWithLastNameSchema);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let response = gateway.execute(Request::new(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(response.data, Some(json!({"me": {"lastName": "Doe"}})));

        gateway.close().await;
    });
}

#[test]
fn nullable_references_resolve_to_null_without_errors() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post = MockGraphQlServer::new(PostSchema).await;

        let gateway = Gateway::new(GatewayConfig::new(vec![
            service("user", &user),
            service("post", &post),
        ]))
        .await
        .unwrap();

        let response = gateway
            .execute(Request::new("{ topPosts { pid author { name } } }"))
            .await;

        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "topPosts": [
              {
                "pid": "p1",
                "author": {
                  "name": "John"
                }
              },
              {
                "pid": "p2",
                "author": {
                  "name": "Jane"
                }
              },
              {
                "pid": "p3",
                "author": {
                  "name": "John"
                }
              },
              {
                "pid": "p4",
                "author": null
              }
            ]
          }
        }
        "###);

        gateway.close().await;
    });
}

#[test]
fn inline_fragments_on_interfaces_pass_through() {
    runtime().block_on(async {
        let products = MockGraphQlServer::new(ProductsSchema).await;

        let gateway = Gateway::new(GatewayConfig::new(vec![service("products", &products)]))
            .await
            .unwrap();

        let response = gateway
            .execute(Request::new("{ products { ... on Book { id type name } } }"))
            .await;

        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "products": [
              {
                "id": "b1",
                "type": "book",
                "name": "A Thousand Plateaus"
              },
              {}
            ]
          }
        }
        "###);

        gateway.close().await;
    });
}

#[test]
fn dynamic_services_add_and_remove() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post = MockGraphQlServer::new(PostSchema).await;

        let services = Arc::new(Mutex::new(vec![service("user", &user)]));
        let post_service = service("post", &post);

        let provider_services = Arc::clone(&services);
        let provider: ServicesProvider = Arc::new(move || {
            let services = provider_services.lock().unwrap().clone();
            Box::pin(async move { Ok(services) })
        });

        let config = GatewayConfig::new(ServiceSource::Provider(provider))
            .with_polling_interval(Duration::from_millis(100));
        let gateway = Gateway::new(config).await.unwrap();

        let query = "{ topPosts(count: 1) { pid } }";
        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "topPosts" on type "Query"."#,
        );

        // The provider grows the set.
        services.lock().unwrap().push(post_service);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let response = gateway.execute(Request::new(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            Some(json!({"topPosts": [{"pid": "p1"}]})),
        );

        // And shrinks it again.
        services.lock().unwrap().truncate(1);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let response = gateway.execute(Request::new(query)).await;
        assert_eq!(
            response.errors[0].message,
            r#"Cannot query field "topPosts" on type "Query"."#,
        );

        gateway.close().await;
    });
}

#[test]
fn batched_and_unbatched_responses_are_identical() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;
        let post = MockGraphQlServer::new(PostSchema).await;

        let plain = Gateway::new(GatewayConfig::new(vec![
            service("user", &user),
            service("post", &post),
        ]))
        .await
        .unwrap();
        let batched = Gateway::new(GatewayConfig::new(vec![
            service("user", &user),
            service("post", &post).with_batched_queries(),
        ]))
        .await
        .unwrap();

        let query =
            "{ me { name posts(count: 1) { pid } } topPosts(count: 2) { pid title } }";

        let plain_response =
            serde_json::to_value(plain.execute(Request::new(query)).await).unwrap();
        let batched_response =
            serde_json::to_value(batched.execute(Request::new(query)).await).unwrap();

        assert_eq!(plain_response, batched_response);

        plain.close().await;
        batched.close().await;
    });
}

#[test]
fn mutations_execute_sequentially() {
    runtime().block_on(async {
        let state = MockGraphQlServer::new(StateMutationSchema::default()).await;

        let gateway = Gateway::new(GatewayConfig::new(vec![service("state", &state)]))
            .await
            .unwrap();

        let response = gateway.execute(Request::new("{ value }")).await;
        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "value": 0
          }
        }
        "###);

        let response = gateway
            .execute(Request::new(
                r"
                mutation {
                    first: set(val: 1)
                    second: multiply(by: 2)
                    third: multiply(by: 7)
                    fourth: set(val: 3)
                    fifth: multiply(by: 11)
                }
                ",
            ))
            .await;
        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "first": 1,
            "second": 2,
            "third": 14,
            "fourth": 3,
            "fifth": 33
          }
        }
        "###);

        let response = gateway.execute(Request::new("{ value }")).await;
        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "value": 33
          }
        }
        "###);

        gateway.close().await;
    });
}

#[test]
fn subscriptions_are_proxied_over_websockets() {
    runtime().block_on(async {
        let post = MockGraphQlServer::new(PostSchema).await;

        let post_service =
            service("post", &post).with_ws_url(post.ws_url().parse().unwrap());
        let gateway = Gateway::new(GatewayConfig::new(vec![post_service]))
            .await
            .unwrap();

        let mut stream = gateway
            .subscribe(Request::new("subscription { postAdded { pid title } }"))
            .await
            .expect("subscription failed");

        let first = stream.next().await.expect("first event");
        assert_eq!(
            first.data,
            Some(json!({"postAdded": {"pid": "p1", "title": "Post 1"}})),
        );

        let second = stream.next().await.expect("second event");
        assert_eq!(
            second.data,
            Some(json!({"postAdded": {"pid": "p2", "title": "Post 2"}})),
        );

        assert!(stream.next().await.is_none());

        gateway.close().await;
    });
}

#[test]
fn collectors_reach_the_resolution_hook() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;

        let mut user_service = service("user", &user);
        user_service.collect_status_codes = true;

        let captured = Arc::new(Mutex::new(None));
        let captured_in_hook = Arc::clone(&captured);

        let mut config = GatewayConfig::new(vec![user_service]);
        config.hooks.on_resolution = Some(Arc::new(move |_response, collectors| {
            *captured_in_hook.lock().unwrap() = Some(collectors.clone());
            Ok(())
        }));

        let gateway = Gateway::new(config).await.unwrap();

        let response = gateway.execute(Request::new("{ me { name } }")).await;
        assert!(response.errors.is_empty());

        let collectors = captured.lock().unwrap().clone().expect("hook ran");
        assert_eq!(collectors.status_codes.get("user"), Some(&vec![200]));

        gateway.close().await;
    });
}

#[test]
fn plans_are_cached_per_schema_version() {
    runtime().block_on(async {
        let user = MockGraphQlServer::new(UserSchema).await;

        let gateway = Gateway::new(GatewayConfig::new(vec![service("user", &user)]))
            .await
            .unwrap();

        // Same operation twice: the second run rides the cached plan and
        // must produce the same result.
        let first = gateway.execute(Request::new("{ me { id name } }")).await;
        let second = gateway.execute(Request::new("{ me { id name } }")).await;

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap(),
        );

        gateway.close().await;
    });
}
