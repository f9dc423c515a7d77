use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use engine::SubgraphHandle;
use runtime::fetch::{FetchError, GraphqlTransport};
use runtime_local::{SubgraphClient, SubgraphClientConfig};

use crate::{config::ServiceConfig, error::GatewayError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Healthy,
    Errored(String),
    Closed,
}

pub(crate) struct Service {
    pub config: ServiceConfig,
    pub client: Arc<SubgraphClient>,
    pub status: ServiceStatus,
    pub sdl: Option<String>,
}

impl Service {
    pub fn mark_healthy(&mut self, sdl: String) {
        self.sdl = Some(sdl);
        self.status = ServiceStatus::Healthy;
    }

    pub fn mark_errored(&mut self, error: &FetchError) {
        self.status = ServiceStatus::Errored(error.to_string());
    }
}

/// The live set of subgraph clients, keyed by service name. Only the gateway
/// refresh, retry and poll paths mutate it.
#[derive(Default)]
pub(crate) struct Registry {
    services: BTreeMap<String, Service>,
}

impl Registry {
    pub fn upsert(&mut self, config: ServiceConfig) -> Result<(), GatewayError> {
        let client = SubgraphClient::new(client_config(&config))
            .map_err(|err| GatewayError::InvalidConfiguration(err.to_string()))?;

        self.services.insert(
            config.name.clone(),
            Service {
                config,
                client: Arc::new(client),
                status: ServiceStatus::Errored("never fetched".to_owned()),
                sdl: None,
            },
        );
        Ok(())
    }

    /// Close and drop a service. Close failures are logged, never propagated:
    /// removal must always succeed.
    pub async fn remove(&mut self, name: &str) {
        if let Some(service) = self.services.remove(name) {
            service.client.close().await;
            tracing::debug!("removed service {name:?}");
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Service)> {
        self.services.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Service)> {
        self.services.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// The engine-facing view of the current set: transports plus collector
    /// switches, one handle per service.
    pub fn snapshot(&self) -> HashMap<String, SubgraphHandle> {
        self.services
            .iter()
            .map(|(name, service)| {
                (
                    name.clone(),
                    SubgraphHandle {
                        name: name.clone(),
                        transport: Arc::clone(&service.client) as Arc<dyn GraphqlTransport>,
                        collect_status_codes: service.config.collect_status_codes,
                        collect_extensions: service.config.collect_extensions,
                    },
                )
            })
            .collect()
    }

    pub async fn close_all(&mut self) {
        for service in self.services.values_mut() {
            service.client.close().await;
            service.status = ServiceStatus::Closed;
        }
    }
}

fn client_config(config: &ServiceConfig) -> SubgraphClientConfig {
    let mut client = SubgraphClientConfig::new(config.name.clone(), config.urls.clone());
    client.ws_url = config.ws_url.clone();
    client.allow_batched_queries = config.allow_batched_queries;
    client.rewrite_headers = config.rewrite_headers.clone();
    client.keep_alive_timeout = config.keep_alive_timeout;
    client.connect_timeout = config.connect_timeout;
    client.request_timeout = config.request_timeout;
    client.retry = config.retry;
    client
}
