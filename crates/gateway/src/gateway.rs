use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use composition::FederatedSchema;
use engine::{ExecutionContext, PrepareError, PreparedOperation, Response, SubgraphHandle};
use futures_util::stream::BoxStream;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::{validate_services, GatewayConfig, Request, ServiceSource},
    error::GatewayError,
    refresh,
    registry::{Registry, ServiceStatus},
};

/// Everything an operation needs, bound together so a hot swap never tears
/// a request between two schema versions.
pub(crate) struct GatewayState {
    pub schema: Arc<FederatedSchema>,
    pub subgraphs: HashMap<String, SubgraphHandle>,
}

pub(crate) struct GatewayInner {
    pub config: GatewayConfig,
    pub registry: tokio::sync::Mutex<Registry>,
    state_tx: watch::Sender<Arc<GatewayState>>,
    state_rx: watch::Receiver<Arc<GatewayState>>,
    plan_cache: Option<mini_moka::sync::Cache<String, Arc<PreparedOperation>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl GatewayInner {
    pub fn current(&self) -> Arc<GatewayState> {
        self.state_rx.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Atomically publish a freshly composed schema. The replace hook fires
    /// only when the schema actually changed; hook failures are advisory.
    pub fn install(&self, schema: FederatedSchema, registry: &Registry) {
        let previous_version = self.current().schema.version;
        let schema = Arc::new(schema);

        let state = Arc::new(GatewayState {
            schema: Arc::clone(&schema),
            subgraphs: registry.snapshot(),
        });
        let _ = self.state_tx.send(state);

        if schema.version != previous_version {
            if let Some(hook) = &self.config.hooks.on_schema_replace {
                if let Err(err) = hook(schema) {
                    tracing::error!("schema replace hook failed: {err}");
                }
            }
        }
    }
}

/// The federated gateway instance.
///
/// Construction composes the initial schema; afterwards background loops
/// keep it fresh while `execute` and `subscribe` serve operations against
/// whatever schema is current when they start.
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub async fn new(config: GatewayConfig) -> Result<Gateway, GatewayError> {
        let services = match &config.services {
            ServiceSource::List(services) => services.clone(),
            ServiceSource::Provider(provider) => provider().await.map_err(|err| {
                GatewayError::InvalidConfiguration(format!("services provider failed: {err}"))
            })?,
        };
        validate_services(&services)?;

        let mut registry = Registry::default();
        for service in services {
            registry.upsert(service)?;
        }

        refresh::fetch_all_sdls(&mut registry).await;
        let schema = refresh::compose_registry(&mut registry)?;

        let has_errored_mandatory = registry.iter().any(|(_, service)| {
            service.config.mandatory && matches!(service.status, ServiceStatus::Errored(_))
        });

        let state = Arc::new(GatewayState {
            schema: Arc::new(schema),
            subgraphs: registry.snapshot(),
        });
        let (state_tx, state_rx) = watch::channel(state);

        let plan_cache = config.cache.then(|| {
            mini_moka::sync::Cache::builder().max_capacity(1000).build()
        });

        let inner = Arc::new(GatewayInner {
            config,
            registry: tokio::sync::Mutex::new(registry),
            state_tx,
            state_rx,
            plan_cache,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let mut tasks = Vec::new();
        if has_errored_mandatory {
            tasks.push(tokio::spawn(refresh::retry_loop(Arc::clone(&inner))));
        }
        if let Some(interval) = inner.config.polling_interval {
            tasks.push(tokio::spawn(refresh::poll_loop(
                Arc::clone(&inner),
                interval,
            )));
        }
        *inner.tasks.lock().expect("poisoned") = tasks;

        Ok(Gateway { inner })
    }

    /// The currently active composed schema.
    pub fn schema(&self) -> Arc<FederatedSchema> {
        Arc::clone(&self.inner.current().schema)
    }

    pub async fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        let registry = self.inner.registry.lock().await;
        let status = registry
            .iter()
            .find(|(service_name, _)| service_name.as_str() == name)
            .map(|(_, service)| service.status.clone());
        status
    }

    /// Execute one operation against the schema active right now. In-flight
    /// operations are unaffected by concurrent hot swaps.
    pub async fn execute(&self, request: Request) -> Response {
        let state = self.inner.current();

        let prepared = match self.prepared(&state, &request) {
            Ok(prepared) => prepared,
            Err(err) => return err.into_response(),
        };

        let ctx = ExecutionContext {
            schema: state.schema.as_ref(),
            subgraphs: &state.subgraphs,
            headers: &request.headers,
        };
        let (response, collectors) = engine::execute(ctx, &prepared, &request.variables).await;

        if let Some(hook) = &self.inner.config.hooks.on_resolution {
            if let Err(err) = hook(&response, &collectors) {
                tracing::error!("resolution hook failed: {err}");
            }
        }

        response
    }

    /// Proxy a subscription to its owning service. The stream stays bound to
    /// the schema that was active when it was opened.
    pub async fn subscribe(
        &self,
        request: Request,
    ) -> Result<BoxStream<'static, Response>, Box<Response>> {
        let state = self.inner.current();

        let prepared = self
            .prepared(&state, &request)
            .map_err(|err| Box::new(err.into_response()))?;

        let ctx = ExecutionContext {
            schema: state.schema.as_ref(),
            subgraphs: &state.subgraphs,
            headers: &request.headers,
        };
        engine::subscribe(ctx, &prepared, &request.variables).await
    }

    /// Stop the background loops and close every subgraph client.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);

        for task in self.inner.tasks.lock().expect("poisoned").drain(..) {
            task.abort();
        }

        let mut registry = self.inner.registry.lock().await;
        registry.close_all().await;
    }

    fn prepared(
        &self,
        state: &GatewayState,
        request: &Request,
    ) -> Result<Arc<PreparedOperation>, PrepareError> {
        let Some(cache) = &self.inner.plan_cache else {
            return engine::prepare(
                &state.schema,
                &request.query,
                request.operation_name.as_deref(),
            )
            .map(Arc::new);
        };

        let key = format!(
            "{}\u{0}{}\u{0}{}",
            state.schema.version,
            request.operation_name.as_deref().unwrap_or_default(),
            request.query,
        );

        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }

        let prepared = Arc::new(engine::prepare(
            &state.schema,
            &request.query,
            request.operation_name.as_deref(),
        )?);
        cache.insert(key, Arc::clone(&prepared));
        Ok(prepared)
    }
}
