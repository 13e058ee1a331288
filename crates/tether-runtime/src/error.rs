//! Runtime error types

use thiserror::Error;

use tether_core::{ErrorKind, PositionIndex};

pub use tether_core::{Error, Result};

/// Terminal failure of a connector, with enough context to diagnose and
/// safely restart it.
///
/// The offset store is left at `last_committed`; a restart resumes there.
#[derive(Error, Debug)]
#[error(
    "connector '{connector}' failed ({kind}), last committed position {}: {error}",
    display_index(.last_committed)
)]
pub struct ConnectorFailure {
    /// Connector identity
    pub connector: String,

    /// Last position successfully committed to the offset store
    pub last_committed: Option<PositionIndex>,

    /// Error classification
    pub kind: ErrorKind,

    /// Underlying error
    #[source]
    pub error: Error,
}

fn display_index(index: &Option<PositionIndex>) -> String {
    index
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}
