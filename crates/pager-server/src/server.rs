//! Main pager server: wires Consul, channels, metrics and the driver.

use crate::channels::build_channels;
use crate::config::Config;
use crate::consul::{ConsulClient, ConsulLock, register_checks};
use crate::driver::Driver;
use crate::error::ServerError;
use crate::http_server::MetricsServer;
use pager::{PagerMetrics, WatchEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct PagerServer {
    config: Config,
}

impl PagerServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until `shutdown` fires.
    ///
    /// An unreachable Consul agent at startup is fatal. Losing the lock race
    /// is not: the driver keeps retrying.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let config = self.config;
        let options = config.engine_options()?;
        let channels = build_channels(&config.channels)?;

        let client = ConsulClient::new(&config.consul)?;
        match client.leader().await {
            Ok(leader) => info!(address = %config.consul.address, raft_leader = %leader, "Connected to Consul"),
            Err(source) => {
                return Err(ServerError::ConsulUnreachable {
                    address: config.consul.address.clone(),
                    source,
                });
            }
        }

        let registered = register_checks(&client, &config.checks).await?;
        if registered > 0 {
            info!(count = registered, "Checks registered");
        }

        let metrics = config.metrics.enabled.then(|| Arc::new(PagerMetrics::new()));
        let lock = ConsulLock::new(client.clone(), &config.consul);
        info!(key = %lock.key(), "Using leadership lock");

        let engine = Arc::new(WatchEngine::new(
            Arc::new(lock),
            Arc::new(client),
            options,
            metrics.clone(),
        ));
        for channel in channels {
            engine.add_channel(channel).await?;
        }

        let metrics_handle = metrics.map(|registry| {
            let server = MetricsServer::new(
                registry,
                engine.clone(),
                config.metrics.listen_addr.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    warn!(error = %e, "Metrics server error");
                }
            })
        });

        info!(
            maturity = %humantime::format_duration(engine.options().default_maturity),
            "Starting pager watcher"
        );
        let driver = Driver::new(engine, config.driver.leadership_check_interval);
        if let Err(e) = driver.run(shutdown).await {
            // A standby cannot delete a lock the leader still holds
            warn!(error = %e, "Teardown incomplete");
        }

        if let Some(handle) = metrics_handle {
            handle.abort();
        }
        info!("Pager stopped");
        Ok(())
    }
}
