use std::sync::{Arc, RwLock};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use http::HeaderMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::Schema;

#[derive(Clone)]
pub(crate) struct AppState {
    pub schema: Arc<RwLock<Arc<dyn Schema>>>,
}

/// One mock subgraph behind a real HTTP (and WebSocket) listener.
pub struct MockGraphQlServer {
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    port: u16,
}

impl Drop for MockGraphQlServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
    }
}

impl MockGraphQlServer {
    pub async fn new(schema: impl Schema + 'static) -> Self {
        Self::start(schema, 0).await
    }

    /// Bind a specific port, for tests where a service comes up on an
    /// address the gateway already knows.
    pub async fn new_on_port(schema: impl Schema + 'static, port: u16) -> Self {
        Self::start(schema, port).await
    }

    async fn start(schema: impl Schema + 'static, port: u16) -> Self {
        let state = AppState {
            schema: Arc::new(RwLock::new(Arc::new(schema) as Arc<dyn Schema>)),
        };

        let app = Router::new()
            .route("/", post(graphql_handler))
            .route("/ws", get(crate::ws::ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("mock server failed");
        });

        // Give the listener a moment to accept.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        MockGraphQlServer {
            state,
            shutdown: Some(shutdown_tx),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Replace the served schema in place, like a subgraph deploy.
    pub fn swap_schema(&self, schema: impl Schema + 'static) {
        *self.state.schema.write().expect("poisoned") = Arc::new(schema);
    }

    pub fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
    }
}

async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let schema = state.schema.read().expect("poisoned").clone();
    let headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();

    match body {
        // Batched array bodies demultiplex positionally.
        Value::Array(items) => {
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                responses.push(run_one(schema.as_ref(), &headers, item).await);
            }
            Json(Value::Array(responses))
        }
        item => Json(run_one(schema.as_ref(), &headers, item).await),
    }
}

async fn run_one(schema: &dyn Schema, headers: &[(String, String)], body: Value) -> Value {
    let request: async_graphql::Request = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(err) => {
            return serde_json::json!({"errors": [{"message": err.to_string()}]});
        }
    };

    let response = schema.execute(headers.to_vec(), request).await;
    serde_json::to_value(&response).unwrap_or(Value::Null)
}
