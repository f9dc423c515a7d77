use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::secure_json;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("invalid JSON response: {0}")]
    InvalidJson(String),
    #[error("rejected unsafe JSON response: {0}")]
    InsecureJson(String),
    #[error("the service did not expose a federation SDL")]
    MissingSdl,
    #[error("the subgraph client is closed")]
    Closed,
}

impl FetchError {
    pub fn transport(error: impl ToString) -> Self {
        FetchError::Transport(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// One GraphQL request on its way to a subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphRequest {
    pub query: String,
    pub variables: Value,
    pub headers: http::HeaderMap,
    /// Whether the call may be replayed on transport failure. False for
    /// mutations.
    pub retryable: bool,
}

impl SubgraphRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SubgraphRequest {
            query: query.into(),
            variables: Value::Object(Default::default()),
            headers: http::HeaderMap::new(),
            retryable: true,
        }
    }

    pub fn without_retries(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(&self) -> Value {
        serde_json::json!({
            "query": self.query,
            "variables": self.variables,
        })
    }
}

/// A subgraph's GraphQL response. A non-2xx status is not by itself a
/// failure: the body is parsed regardless and the carried `errors` speak.
#[derive(Debug, Clone, Default)]
pub struct SubgraphResponse {
    pub status: Option<http::StatusCode>,
    pub data: Option<Value>,
    pub errors: Vec<WireError>,
    pub extensions: Option<Value>,
}

/// An error entry exactly as the subgraph sent it.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct WireError {
    #[serde(default = "unknown_message")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

fn unknown_message() -> String {
    "unknown subgraph error".to_owned()
}

impl WireError {
    pub fn message(message: impl Into<String>) -> Self {
        WireError {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

impl SubgraphResponse {
    pub fn from_bytes(status: Option<http::StatusCode>, bytes: &Bytes) -> FetchResult<Self> {
        let value = secure_json::parse(bytes)?;
        Ok(Self::from_value(status, value))
    }

    pub fn from_value(status: Option<http::StatusCode>, value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return SubgraphResponse {
                status,
                data: None,
                errors: vec![WireError::message("subgraph returned a non-object body")],
                extensions: None,
            };
        };

        let data = match object.remove("data") {
            None | Some(Value::Null) => None,
            Some(data) => Some(data),
        };

        let errors = match object.remove("errors") {
            Some(Value::Array(errors)) => errors
                .into_iter()
                .map(|error| {
                    serde_json::from_value(error)
                        .unwrap_or_else(|_| WireError::message(unknown_message()))
                })
                .collect(),
            _ => Vec::new(),
        };

        SubgraphResponse {
            status,
            data,
            errors,
            extensions: object.remove("extensions"),
        }
    }

    /// Whether this response carries anything to stitch.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// The seam the engine talks through. One implementor per subgraph.
#[async_trait::async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn execute(&self, request: SubgraphRequest) -> FetchResult<SubgraphResponse>;

    async fn subscribe(
        &self,
        request: SubgraphRequest,
    ) -> FetchResult<BoxStream<'static, FetchResult<Value>>>;

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_errors_alongside_data() {
        let body = Bytes::from_static(
            br#"{"data":{"me":null},"errors":[{"message":"boom","path":["me"]}]}"#,
        );
        let response = SubgraphResponse::from_bytes(Some(http::StatusCode::OK), &body).unwrap();
        assert!(response.has_data());
        assert_eq!(response.errors[0].message, "boom");
        assert_eq!(response.errors[0].path.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn non_2xx_bodies_are_still_parsed() {
        let body = Bytes::from_static(br#"{"errors":[{"message":"teapot"}]}"#);
        let response =
            SubgraphResponse::from_bytes(Some(http::StatusCode::IM_A_TEAPOT), &body).unwrap();
        assert!(!response.has_data());
        assert_eq!(response.errors[0].message, "teapot");
    }

    #[test]
    fn malformed_json_is_a_fetch_error() {
        let body = Bytes::from_static(b"<html>bad gateway</html>");
        let err = SubgraphResponse::from_bytes(Some(http::StatusCode::BAD_GATEWAY), &body)
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidJson(_)));
    }
}
