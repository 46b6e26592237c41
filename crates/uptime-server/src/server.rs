//! Main uptime server implementation.

use crate::http_server::MetricsServer;
use crate::metrics::MetricsRegistry;
use crate::scheduler::Scheduler;
use crate::types::ServerConfig;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uptime::{Collaborators, HttpProber, MemoryStore, SqliteStore, Target, TargetStore};

/// Uptime server
pub struct UptimeServer {
    config: ServerConfig,
}

impl UptimeServer {
    /// Create a new uptime server
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> common::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the server until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> common::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(storage_url = %self.config.storage_url, "Starting uptime server");

        let collaborators = open_storage(&self.config.storage_url, &self.config.seed_targets).await?;

        // Storage must be readable at boot.
        let targets = collaborators
            .targets
            .list_active_targets()
            .await
            .map_err(common::Error::storage)?;
        info!(active_targets = targets.len(), "Storage ready");

        let metrics = if self.config.metrics_enabled {
            info!("Metrics enabled on {}", self.config.metrics_listen_addr);
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let prober = HttpProber::new().map_err(common::Error::other)?;
        let scheduler = Scheduler::new(
            self.config.scheduler.clone(),
            collaborators,
            Arc::new(prober),
            metrics.clone(),
        );

        if self.config.reconcile_on_start {
            let repaired = scheduler
                .reconcile_all()
                .await
                .map_err(common::Error::storage)?;
            if repaired > 0 {
                warn!(repaired, "Incidents repaired at startup");
            }
        }

        // Spawn HTTP metrics server (if enabled)
        let metrics_handle = metrics.map(|registry| {
            let server = MetricsServer::new(registry, self.config.metrics_listen_addr.clone());
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    warn!(error = %e, "Metrics server error");
                }
            })
        });

        let scheduler_handle = scheduler.start();

        shutdown.await;
        info!("Shutdown requested");

        scheduler.stop();
        if let Err(e) = scheduler_handle.await {
            warn!(error = %e, "Scheduler task failed");
        }
        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        let abandoned = scheduler.in_flight().len();
        if abandoned > 0 {
            info!(abandoned, "Abandoning in-flight probes");
        }
        info!("Uptime server stopped");
        Ok(())
    }
}

/// Open the configured backend and upsert the seed targets
async fn open_storage(url: &str, seed: &[Target]) -> common::Result<Collaborators> {
    if url == "memory" {
        let store = MemoryStore::with_targets(seed.iter().cloned());
        return Ok(Collaborators::from_store(Arc::new(store)));
    }

    let store = SqliteStore::connect(url)
        .await
        .map_err(common::Error::storage)?;
    for target in seed {
        store
            .upsert_target(target)
            .await
            .map_err(common::Error::storage)?;
    }
    if !seed.is_empty() {
        info!(targets = seed.len(), "Seed targets upserted");
    }
    Ok(Collaborators::from_store(Arc::new(store)))
}
