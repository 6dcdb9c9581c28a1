//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use haulage_core::pricing::{PricingService, PricingState};
use haulage_core::store::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Only pricing (the default configuration and the holiday calendar) is
/// applied live; everything else is read once at startup.
///
/// Returns a Notify that can be used to signal when shutdown is complete.
pub fn spawn_config_reload_handler(
    store: Arc<dyn Store>,
    pricing: PricingService,
    config_loader: Arc<ConfigLoader>,
    listen: SocketAddr,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, config reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(config) => {
                            if config.listen != listen {
                                tracing::warn!(
                                    current = %listen,
                                    configured = %config.listen,
                                    "Listen address changed, restart required to apply"
                                );
                            }
                            apply_pricing(store.as_ref(), &pricing, config.pricing).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload configuration");
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}

/// Publish the file's holidays and default pricing configuration.
///
/// A configuration from the file is persisted as the active one first. Without
/// one, the configuration last activated in the store is used.
pub async fn apply_pricing(store: &dyn Store, pricing: &PricingService, state: PricingState) {
    let holidays = state.holidays.len();
    let mut version = pricing.set_holidays(state.holidays);

    let configuration = match state.configuration {
        Some(configuration) => {
            if let Err(e) = configuration.validate() {
                tracing::error!(error = %e, "Rejected pricing configuration");
                return;
            }
            if let Err(e) = store.activate_pricing_configuration(&configuration).await {
                tracing::error!(error = %e, "Failed to persist pricing configuration");
                return;
            }
            Some(configuration)
        }
        None => match store.active_pricing_configuration().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load stored pricing configuration");
                None
            }
        },
    };

    match configuration {
        Some(configuration) => match pricing.publish(configuration) {
            Ok(v) => version = v,
            Err(e) => tracing::error!(error = %e, "Rejected pricing configuration"),
        },
        None => tracing::warn!("No pricing configuration available, quotes will fail"),
    }
    tracing::info!(version, holidays, "Pricing configuration applied");
}
