//! A minimal `graphql-transport-ws` server side: connection_init/ack,
//! subscribe, next, complete. Enough for a gateway's subscription client.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::server::AppState;

pub(crate) async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.protocols(["graphql-transport-ws"])
        .on_upgrade(move |socket| serve(socket, state))
}

async fn serve(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("connection_init") => {
                if send(&mut socket, json!({"type": "connection_ack"})).await.is_err() {
                    return;
                }
            }
            Some("ping") => {
                if send(&mut socket, json!({"type": "pong"})).await.is_err() {
                    return;
                }
            }
            Some("subscribe") => {
                let id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("1")
                    .to_owned();
                let payload = value.get("payload").cloned().unwrap_or(Value::Null);
                let request: async_graphql::Request = match serde_json::from_value(payload) {
                    Ok(request) => request,
                    Err(err) => {
                        let _ = send(
                            &mut socket,
                            json!({
                                "type": "error",
                                "id": id,
                                "payload": [{"message": err.to_string()}],
                            }),
                        )
                        .await;
                        continue;
                    }
                };

                let schema = state.schema.read().expect("poisoned").clone();
                let mut stream = schema.execute_stream(request);
                while let Some(response) = stream.next().await {
                    let next = json!({"type": "next", "id": id, "payload": response});
                    if send(&mut socket, next).await.is_err() {
                        return;
                    }
                }
                if send(&mut socket, json!({"type": "complete", "id": id}))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            _ => {}
        }
    }
}

async fn send(socket: &mut WebSocket, message: Value) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(message.to_string()))
        .await
}
