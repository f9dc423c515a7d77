use std::time::Duration;

use futures_util::{stream::BoxStream, StreamExt};
use runtime::fetch::{FetchError, FetchResult, SubgraphRequest};
use serde_json::Value;
use tungstenite::{client::IntoClientRequest, http::HeaderValue};
use url::Url;

/// Connection attempts before giving up on a subscription.
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(serde::Serialize)]
struct WsOperation {
    query: String,
    variables: Value,
}

impl graphql_ws_client::graphql::GraphqlOperation for WsOperation {
    type Response = Value;
    type Error = FetchError;

    fn decode(&self, data: Value) -> Result<Self::Response, Self::Error> {
        Ok(data)
    }
}

/// Open a `graphql-transport-ws` subscription against `url`, retrying the
/// connection with exponential backoff.
pub(crate) async fn subscribe(
    url: Url,
    request: SubgraphRequest,
    headers: http::HeaderMap,
) -> FetchResult<BoxStream<'static, FetchResult<Value>>> {
    // The handshake request is not reusable, so rebuild it per attempt.
    let build_request = || {
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(FetchError::transport)?;
        ws_request.headers_mut().extend(headers.clone());
        ws_request.headers_mut().insert(
            http::header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("graphql-transport-ws"),
        );
        Ok(ws_request)
    };

    let mut attempt = 0;
    let connection = loop {
        match async_tungstenite::tokio::connect_async(build_request()?).await {
            Ok((connection, _)) => break connection,
            Err(err) if attempt + 1 < CONNECT_ATTEMPTS => {
                let backoff = CONNECT_BACKOFF * 2u32.saturating_pow(attempt);
                tracing::debug!("subscription connect to {url} failed, retrying: {err}");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(FetchError::transport(err)),
        }
    };

    let subscription = graphql_ws_client::Client::build(connection)
        .subscribe(WsOperation {
            query: request.query,
            variables: request.variables,
        })
        .await
        .map_err(FetchError::transport)?;

    Ok(subscription
        .map(|item| item.map_err(FetchError::transport))
        .boxed())
}
