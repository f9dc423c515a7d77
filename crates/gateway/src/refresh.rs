//! The background half of the gateway: SDL fetching, recomposition, the
//! startup retry loop for mandatory services and the SDL polling loop.

use std::{collections::BTreeSet, sync::Arc};

use composition::{compose, FederatedSchema, Subgraphs};
use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::{
    config::{validate_services, ServiceSource},
    error::GatewayError,
    gateway::GatewayInner,
    registry::{Registry, ServiceStatus},
};

/// Fetch every registered service's SDL concurrently and record the outcome.
pub(crate) async fn fetch_all_sdls(registry: &mut Registry) {
    let futures: Vec<_> = registry
        .iter()
        .map(|(name, service)| {
            let name = name.clone();
            let client = Arc::clone(&service.client);
            async move { (name, client.fetch_sdl().await) }
        })
        .collect();

    for (name, result) in join_all(futures).await {
        let Some(service) = registry.get_mut(&name) else {
            continue;
        };
        match result {
            Ok(sdl) => service.mark_healthy(sdl),
            Err(err) => {
                tracing::warn!("could not fetch the SDL of service {name:?}: {err}");
                service.mark_errored(&err);
            }
        }
    }
}

/// Compose the SDLs currently held by the registry. Services with an invalid
/// SDL are excluded with a warning; an empty result set is fatal.
pub(crate) fn compose_registry(registry: &mut Registry) -> Result<FederatedSchema, GatewayError> {
    let mut subgraphs = Subgraphs::default();

    for (name, service) in registry.iter_mut() {
        let Some(sdl) = service.sdl.clone() else {
            continue;
        };
        if let Err(err) = subgraphs.ingest_sdl(name, &sdl) {
            tracing::warn!("invalid SDL from service {name:?}: {err}");
            service.status = ServiceStatus::Errored(err.to_string());
        }
    }

    if subgraphs.is_empty() {
        return Err(GatewayError::NoValidServiceSdls);
    }

    let result = compose(&subgraphs);
    for message in result.diagnostics.iter_messages() {
        tracing::warn!("composition: {message}");
    }

    result
        .into_result()
        .map_err(|diagnostics| GatewayError::Composition(diagnostics.to_string()))
}

pub(crate) async fn recompose_and_swap(inner: &Arc<GatewayInner>, registry: &mut Registry) {
    match compose_registry(registry) {
        Ok(schema) => inner.install(schema, registry),
        // Background recomposition failures keep the previous schema.
        Err(err) => tracing::error!("gateway refresh failed: {err}"),
    }
}

/// Startup retry for mandatory services. Stops on the first round that
/// recovers a service, or when the attempt budget is spent.
pub(crate) async fn retry_loop(inner: Arc<GatewayInner>) {
    for _ in 0..inner.config.retry_count {
        tokio::time::sleep(inner.config.retry_interval).await;
        if inner.is_closed() {
            return;
        }

        let mut registry = inner.registry.lock().await;
        let pending: Vec<String> = registry
            .iter()
            .filter(|(_, service)| {
                service.config.mandatory
                    && matches!(service.status, ServiceStatus::Errored(_))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if pending.is_empty() {
            return;
        }

        let mut recovered = false;
        for name in pending {
            let Some(service) = registry.get_mut(&name) else {
                continue;
            };
            let client = Arc::clone(&service.client);
            match client.fetch_sdl().await {
                Ok(sdl) => {
                    tracing::info!("mandatory service {name:?} came up");
                    service.mark_healthy(sdl);
                    recovered = true;
                }
                Err(err) => {
                    tracing::debug!("mandatory service {name:?} still unreachable: {err}");
                }
            }
        }

        if recovered {
            recompose_and_swap(&inner, &mut registry).await;
            return;
        }
    }

    tracing::error!(
        "gateway refresh failed: mandatory services still unreachable after {} retries",
        inner.config.retry_count,
    );
}

/// The SDL polling loop. Every tick refetches healthy services, reconciles
/// the dynamic provider's set, and recomposes when anything changed.
pub(crate) async fn poll_loop(inner: Arc<GatewayInner>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    // A slow subgraph must not cause a burst of catch-up polls.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; composition just happened.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if inner.is_closed() {
            return;
        }
        poll_once(&inner).await;
    }
}

pub(crate) async fn poll_once(inner: &Arc<GatewayInner>) {
    let mut registry = inner.registry.lock().await;
    let mut changed = false;

    // Dynamic topologies: reconcile the provider's desired set first.
    if let ServiceSource::Provider(provider) = &inner.config.services {
        match provider().await {
            Ok(services) => {
                if let Err(err) = validate_services(&services) {
                    tracing::warn!("ignoring invalid service set from provider: {err}");
                } else {
                    let desired: BTreeSet<String> =
                        services.iter().map(|service| service.name.clone()).collect();

                    for name in registry.names() {
                        if !desired.contains(&name) {
                            registry.remove(&name).await;
                            changed = true;
                        }
                    }

                    for service in services {
                        if !registry.contains(&service.name) {
                            let name = service.name.clone();
                            match registry.upsert(service) {
                                Ok(()) => changed = true,
                                Err(err) => {
                                    tracing::warn!("cannot register service {name:?}: {err}");
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => tracing::warn!("services provider failed: {err}"),
        }
    }

    // Refetch SDLs of healthy services, and of services never fetched yet
    // (the ones the provider just added). Services that failed before stay
    // failed until the retry loop or the provider brings them back.
    let candidates: Vec<String> = registry
        .iter()
        .filter(|(_, service)| {
            service.status == ServiceStatus::Healthy || service.sdl.is_none()
        })
        .map(|(name, _)| name.clone())
        .collect();

    let fetches: Vec<_> = candidates
        .into_iter()
        .filter_map(|name| {
            registry.get_mut(&name).map(|service| {
                let client = Arc::clone(&service.client);
                async move { (name, client.fetch_sdl().await) }
            })
        })
        .collect();

    for (name, result) in join_all(fetches).await {
        let Some(service) = registry.get_mut(&name) else {
            continue;
        };
        match result {
            Ok(sdl) => {
                if service.sdl.as_deref() != Some(sdl.as_str()) {
                    tracing::info!("service {name:?} changed its schema");
                    service.mark_healthy(sdl);
                    changed = true;
                }
            }
            Err(err) => match service.status {
                // A healthy service that hiccups keeps its previous SDL.
                ServiceStatus::Healthy => {
                    tracing::warn!("could not refresh the SDL of service {name:?}: {err}");
                }
                _ => {
                    tracing::warn!("could not fetch the SDL of service {name:?}: {err}");
                    service.mark_errored(&err);
                }
            },
        }
    }

    if changed {
        recompose_and_swap(inner, &mut registry).await;
    }
}
