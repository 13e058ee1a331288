//! Run the configured connector

use anyhow::Result;
use std::process::ExitCode;
use tether_core::Config;
use tether_runtime::Runtime;

/// Exit code for a connector that ended in `Failed`
const EXIT_CONNECTOR_FAILED: u8 = 2;

/// Run the connector to completion, mapping its terminal state to an exit code
pub async fn run(config: Config) -> Result<ExitCode> {
    tracing::info!("Connector: {}", config.connector.name);

    let runtime = Runtime::new(config);

    tracing::info!("Starting connector (press Ctrl+C to stop)");

    let result = runtime
        .run(|handle| {
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Received shutdown signal");
                        handle.stop();
                    }
                    Err(e) => tracing::warn!("Failed to install Ctrl+C handler: {}", e),
                }
            });
        })
        .await;

    match result {
        Ok(summary) => {
            tracing::info!(
                "✓ Published {} records, last committed position {}",
                summary.records_published,
                summary
                    .last_committed
                    .map(|index| index.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            tracing::error!("{}", failure);
            Ok(ExitCode::from(EXIT_CONNECTOR_FAILED))
        }
    }
}
