//! The `run` command: bring up the coordinator, admin server, and signal
//! handlers, then drive the poll loop on this task.

use anyhow::Result;
use icelog_core::coordinator::PartitionCoordinator;
use icelog_core::Config;
use std::sync::Arc;
use tracing::{error, info};

pub async fn run(config: Config) -> Result<()> {
    let admin_port = config.monitoring.admin_port;
    let coordinator = PartitionCoordinator::builder(config).build().await?;

    let admin = tokio::spawn(crate::server::serve(coordinator.clone(), admin_port));
    spawn_signal_handlers(coordinator.clone());

    info!("Appender started; send SIGUSR1 to force flush all partitions");

    let result = coordinator.run().await;

    admin.abort();
    result?;
    Ok(())
}

fn spawn_signal_handlers(coordinator: Arc<PartitionCoordinator>) {
    let on_interrupt = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down gracefully");
            on_interrupt.stop();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let on_terminate = coordinator.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM, shutting down gracefully");
                        on_terminate.stop();
                    }
                }
                Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
            }
        });

        let on_flush = coordinator;
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => {
                    while sigusr1.recv().await.is_some() {
                        info!("Received SIGUSR1, forcing flush");
                        if on_flush.force_flush_all().await {
                            info!("Force flush completed");
                        } else {
                            error!("Force flush failed for some partitions");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Failed to install SIGUSR1 handler"),
            }
        });
    }

    #[cfg(not(unix))]
    drop(coordinator);
}
