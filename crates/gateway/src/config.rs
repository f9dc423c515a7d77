use std::{collections::BTreeSet, sync::Arc, time::Duration};

use composition::FederatedSchema;
use engine::{Collectors, Response};
use futures_util::future::BoxFuture;
use runtime::retry::RetryConfig;
use runtime_local::HeaderRewriter;
use serde_json::Value;
use url::Url;

use crate::error::GatewayError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Called after every recomposition that changed the schema.
pub type SchemaReplaceHook =
    Arc<dyn Fn(Arc<FederatedSchema>) -> Result<(), BoxError> + Send + Sync>;

/// Called once per operation after stitching, with the collectors the
/// services opted into.
pub type ResolutionHook = Arc<dyn Fn(&Response, &Collectors) -> Result<(), BoxError> + Send + Sync>;

/// An async callback returning the desired service set; invoked at every
/// poll to reconcile dynamic topologies.
pub type ServicesProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<ServiceConfig>, BoxError>> + Send + Sync>;

/// One subgraph as configured by the host.
#[derive(Clone)]
pub struct ServiceConfig {
    pub name: String,
    /// Tried in order; the first reachable endpoint wins.
    pub urls: Vec<Url>,
    pub ws_url: Option<Url>,
    /// Mandatory services must come up for the gateway to stop retrying
    /// them at startup.
    pub mandatory: bool,
    pub allow_batched_queries: bool,
    pub rewrite_headers: Option<HeaderRewriter>,
    pub collect_status_codes: bool,
    pub collect_extensions: bool,
    pub keep_alive_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: Option<RetryConfig>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        ServiceConfig {
            name: name.into(),
            urls: vec![url],
            ws_url: None,
            mandatory: false,
            allow_batched_queries: false,
            rewrite_headers: None,
            collect_status_codes: false,
            collect_extensions: false,
            keep_alive_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            retry: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_batched_queries(mut self) -> Self {
        self.allow_batched_queries = true;
        self
    }

    pub fn with_ws_url(mut self, url: Url) -> Self {
        self.ws_url = Some(url);
        self
    }

    pub fn with_fallback_url(mut self, url: Url) -> Self {
        self.urls.push(url);
        self
    }
}

pub enum ServiceSource {
    List(Vec<ServiceConfig>),
    Provider(ServicesProvider),
}

impl From<Vec<ServiceConfig>> for ServiceSource {
    fn from(services: Vec<ServiceConfig>) -> Self {
        ServiceSource::List(services)
    }
}

#[derive(Clone, Default)]
pub struct GatewayHooks {
    pub on_schema_replace: Option<SchemaReplaceHook>,
    pub on_resolution: Option<ResolutionHook>,
}

pub struct GatewayConfig {
    pub services: ServiceSource,
    /// SDL polling; `None` disables it.
    pub polling_interval: Option<Duration>,
    /// Startup retries for mandatory services.
    pub retry_count: u32,
    pub retry_interval: Duration,
    /// Cache plans per `(schema version, operation text, operation name)`.
    pub cache: bool,
    pub hooks: GatewayHooks,
}

impl GatewayConfig {
    pub fn new(services: impl Into<ServiceSource>) -> Self {
        GatewayConfig {
            services: services.into(),
            polling_interval: None,
            retry_count: 10,
            retry_interval: Duration::from_millis(3000),
            cache: true,
            hooks: GatewayHooks::default(),
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }
}

/// One inbound GraphQL-over-HTTP request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: serde_json::Map<String, Value>,
    pub headers: http::HeaderMap,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: serde_json::Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Startup validation of a service set: duplicate names and missing
/// endpoints are configuration errors, not runtime failures.
pub(crate) fn validate_services(services: &[ServiceConfig]) -> Result<(), GatewayError> {
    let mut seen = BTreeSet::new();
    for service in services {
        if service.name.is_empty() {
            return Err(GatewayError::InvalidConfiguration(
                "a service is missing a name".to_owned(),
            ));
        }
        if !seen.insert(service.name.as_str()) {
            return Err(GatewayError::InvalidConfiguration(format!(
                "duplicate service name {:?}",
                service.name
            )));
        }
        if service.urls.is_empty() {
            return Err(GatewayError::InvalidConfiguration(format!(
                "service {:?} has no url",
                service.name
            )));
        }
    }
    Ok(())
}
