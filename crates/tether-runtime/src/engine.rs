//! Config-driven assembly of a connector

use std::sync::Arc;

use tether_core::Config;

use crate::controller::{Connector, RunSummary, StopHandle};
use crate::error::ConnectorFailure;
use crate::offsets::{OffsetStore, build_offset_store};

/// Runtime for one configured connector
pub struct Runtime {
    config: Config,
    offsets: Arc<dyn OffsetStore>,
}

impl Runtime {
    /// Create a runtime from a loaded configuration
    pub fn new(config: Config) -> Self {
        let offsets = build_offset_store(&config.offsets);
        Self { config, offsets }
    }

    /// Create a runtime sharing an existing offset store
    pub fn with_offset_store(config: Config, offsets: Arc<dyn OffsetStore>) -> Self {
        Self { config, offsets }
    }

    /// Configuration this runtime was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Offset store shared by every connector this runtime builds
    pub fn offset_store(&self) -> Arc<dyn OffsetStore> {
        Arc::clone(&self.offsets)
    }

    /// Build a fresh connector with new source and publisher instances
    pub fn connector(&self) -> Connector {
        Connector::new(
            self.config.connector.clone(),
            self.config.source.build(),
            self.config.publisher.build(),
            self.offset_store(),
        )
    }

    /// Run the connector to completion.
    ///
    /// `on_start` receives the stop handle before the connector starts, so the
    /// caller can wire it to a signal handler.
    pub async fn run<F>(&self, on_start: F) -> Result<RunSummary, ConnectorFailure>
    where
        F: FnOnce(StopHandle),
    {
        let connector = self.connector();
        on_start(connector.stop_handle());

        tracing::info!(
            connector = %self.config.connector.name,
            "Starting connector"
        );
        let summary = connector.execute().await?;
        tracing::info!(
            connector = %summary.connector,
            records = summary.records_published,
            commits = summary.commits,
            "Connector stopped"
        );
        Ok(summary)
    }
}
