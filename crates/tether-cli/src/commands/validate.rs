//! Validate configuration command

use anyhow::Result;
use tether_core::{Config, OffsetStoreConfig};

/// Run the validate command
///
/// Loading already validated the configuration; this reports what it resolved to.
pub fn run(config: &Config) -> Result<()> {
    let connector = &config.connector;

    tracing::info!("✓ Connector: {}", connector.name);
    tracing::info!("✓ Source: {:?}", config.source);
    tracing::info!("✓ Publisher: {:?}", config.publisher);
    match &config.offsets {
        OffsetStoreConfig::File { path } => {
            tracing::info!("✓ Offsets: file {}", path.display())
        }
        OffsetStoreConfig::Memory => {
            tracing::warn!("Offsets are kept in memory; positions will not survive a restart")
        }
    }
    tracing::info!(
        "✓ Commit interval: {}, end of data: {:?}",
        humantime::format_duration(connector.offset_commit_interval),
        connector.on_end_of_data
    );

    tracing::info!("✓ Configuration is valid");
    Ok(())
}
