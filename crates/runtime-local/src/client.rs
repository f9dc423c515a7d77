use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use runtime::{
    fetch::{FetchError, FetchResult, GraphqlTransport, SubgraphRequest, SubgraphResponse},
    retry::{retry, RetryConfig},
};
use serde_json::Value;
use url::Url;

use crate::{batch::Batcher, headers::forwarded_headers, ws};

pub type HeaderRewriter = Arc<dyn Fn(&http::HeaderMap) -> http::HeaderMap + Send + Sync>;

pub struct SubgraphClientConfig {
    pub name: String,
    /// Tried in order; the first reachable endpoint wins.
    pub urls: Vec<Url>,
    pub ws_url: Option<Url>,
    pub allow_batched_queries: bool,
    pub rewrite_headers: Option<HeaderRewriter>,
    pub keep_alive_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: Option<RetryConfig>,
}

impl SubgraphClientConfig {
    pub fn new(name: impl Into<String>, urls: Vec<Url>) -> Self {
        SubgraphClientConfig {
            name: name.into(),
            urls,
            ws_url: None,
            allow_batched_queries: false,
            rewrite_headers: None,
            // Apollo's router uses the same 5s pool idle default; it also
            // picks up DNS changes under load.
            keep_alive_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            retry: None,
        }
    }
}

/// HTTP(S) + WebSocket client for one subgraph.
pub struct SubgraphClient {
    config: SubgraphClientConfig,
    http: reqwest::Client,
    batcher: Mutex<Option<Batcher>>,
    closed: AtomicBool,
}

impl SubgraphClient {
    pub fn new(config: SubgraphClientConfig) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Some(config.keep_alive_timeout))
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(FetchError::transport)?;

        let batcher = config
            .allow_batched_queries
            .then(|| Batcher::spawn(http.clone(), config.urls.clone()));

        Ok(SubgraphClient {
            config,
            http,
            batcher: Mutex::new(batcher),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Fetch the subgraph's federation SDL via `_service { sdl }`.
    pub async fn fetch_sdl(&self) -> FetchResult<String> {
        let request = SubgraphRequest::new("query { _service { sdl } }");
        let response = self.run(request).await?;

        response
            .data
            .as_ref()
            .and_then(|data| data.pointer("/_service/sdl"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(FetchError::MissingSdl)
    }

    fn outbound_headers(&self, inbound: &http::HeaderMap) -> http::HeaderMap {
        match &self.config.rewrite_headers {
            Some(rewrite) => rewrite(inbound),
            None => forwarded_headers(inbound),
        }
    }

    async fn run(&self, request: SubgraphRequest) -> FetchResult<SubgraphResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Closed);
        }

        let headers = self.outbound_headers(&request.headers);
        let body = request.body();

        match self.config.retry.filter(|_| request.retryable) {
            Some(config) => {
                retry(config, tokio::time::sleep, || {
                    self.dispatch(body.clone(), headers.clone())
                })
                .await
            }
            None => self.dispatch(body, headers).await,
        }
    }

    async fn dispatch(
        &self,
        body: Value,
        headers: http::HeaderMap,
    ) -> FetchResult<SubgraphResponse> {
        let batcher = self.batcher.lock().expect("poisoned").clone();
        match batcher {
            Some(batcher) => batcher.submit(body, headers).await,
            None => {
                let (status, bytes) =
                    post_json(&self.http, &self.config.urls, &headers, &body).await?;
                SubgraphResponse::from_bytes(Some(status), &bytes)
            }
        }
    }
}

#[async_trait::async_trait]
impl GraphqlTransport for SubgraphClient {
    async fn execute(&self, request: SubgraphRequest) -> FetchResult<SubgraphResponse> {
        self.run(request).await
    }

    async fn subscribe(
        &self,
        request: SubgraphRequest,
    ) -> FetchResult<BoxStream<'static, FetchResult<Value>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Closed);
        }

        let url = match &self.config.ws_url {
            Some(url) => url.clone(),
            // No explicit WebSocket endpoint: derive one from the HTTP url.
            None => {
                let mut url = self
                    .config
                    .urls
                    .first()
                    .ok_or_else(|| FetchError::transport("no endpoint configured"))?
                    .clone();
                match url.scheme() {
                    "http" => url.set_scheme("ws").expect("static scheme"),
                    "https" => url.set_scheme("wss").expect("static scheme"),
                    _ => {}
                }
                url
            }
        };

        let headers = self.outbound_headers(&request.headers);
        ws::subscribe(url, request, headers).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the batcher closes its queue and stops the drain task.
        self.batcher.lock().expect("poisoned").take();
    }
}

/// POST a JSON body, trying each endpoint in order on transport failure.
/// An HTTP error status is a response, not a failover trigger.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    urls: &[Url],
    headers: &http::HeaderMap,
    body: &Value,
) -> FetchResult<(http::StatusCode, Bytes)> {
    let mut last_error = FetchError::transport("no endpoint configured");

    for url in urls {
        let result = client
            .post(url.clone())
            .headers(headers.clone())
            .header(http::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let bytes = response.bytes().await.map_err(FetchError::transport)?;
                return Ok((status, bytes));
            }
            Err(err) => {
                tracing::debug!("endpoint {url} unreachable: {err}");
                last_error = FetchError::transport(err);
            }
        }
    }

    Err(last_error)
}
