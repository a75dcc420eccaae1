use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Graceful shutdown coordinator for tierpass
pub struct ShutdownCoordinator {
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Resolve on SIGINT. If the handler cannot be installed, never resolve.
    pub async fn wait_for_signal() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                warn!(error = %e, "Could not install signal handler; running until input ends");
                std::future::pending::<()>().await;
            }
        }
    }

    /// Let in-flight events finish, up to the drain timeout. Returns how many
    /// had to be abandoned.
    pub async fn drain(&self, mut tasks: JoinSet<()>) -> usize {
        if tasks.is_empty() {
            return 0;
        }
        info!(in_flight = tasks.len(), "Waiting for in-flight events to finish");

        let finished = timeout(self.drain_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Event task failed during shutdown");
                }
            }
        })
        .await;

        if finished.is_ok() {
            info!("Graceful shutdown completed successfully");
            return 0;
        }

        let abandoned = tasks.len();
        warn!(abandoned, timeout_ms = self.drain_timeout.as_millis() as u64, "Abandoning unfinished events");
        tasks.shutdown().await;
        abandoned
    }
}
