//! Error types for tether-core

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a connector
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// The source could not be opened at startup
    #[error("failed to open source '{location}': {message}")]
    Open {
        /// Source location (path, URL, ...)
        location: String,
        /// Description of the error
        message: String,
    },

    /// The source rejected a resume position
    #[error("cannot seek to position {index}: {message}")]
    Seek {
        /// Rendered position index
        index: String,
        /// Description of the error
        message: String,
    },

    /// Reading the next record failed
    #[error("read error: {message}")]
    Read {
        /// Description of the error
        message: String,
        /// Whether retrying the read may succeed
        transient: bool,
    },

    /// Publishing a record failed
    #[error("publish error: {message}")]
    Publish {
        /// Description of the error
        message: String,
        /// Whether retrying the publish may succeed
        transient: bool,
    },

    /// Draining outstanding publications failed
    #[error("flush error: {message}")]
    Flush {
        /// Description of the error
        message: String,
    },

    /// Writing a commit record to the offset store failed
    #[error("commit for connector '{connector}' failed: {message}")]
    Commit {
        /// Connector identity
        connector: String,
        /// Description of the error
        message: String,
    },

    /// Reading the last commit from the offset store failed
    #[error("reading committed position for connector '{connector}' failed: {message}")]
    OffsetRead {
        /// Connector identity
        connector: String,
        /// Description of the error
        message: String,
    },

    /// An operation did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured limit
        after: Duration,
    },

    /// A lifecycle operation was invoked in the wrong state
    #[error("cannot {operation} while connector is {state}")]
    InvalidState {
        /// Requested operation
        operation: String,
        /// Current connector state
        state: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classification surfaced to the host on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration could not be loaded or is invalid
    Config,
    /// Source unreachable at startup
    Open,
    /// Resume position invalid or unavailable
    Seek,
    /// Reading from the source failed
    Read,
    /// Publishing a record failed
    Publish,
    /// Flushing the publisher failed
    Flush,
    /// Committing a position failed
    Commit,
    /// Reading the committed position failed
    OffsetRead,
    /// An operation timed out
    Timeout,
    /// Lifecycle misuse
    InvalidState,
    /// Underlying IO failure
    Io,
    /// Serialization failure
    Json,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Open => "open",
            ErrorKind::Seek => "seek",
            ErrorKind::Read => "read",
            ErrorKind::Publish => "publish",
            ErrorKind::Flush => "flush",
            ErrorKind::Commit => "commit",
            ErrorKind::OffsetRead => "offset_read",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Io => "io",
            ErrorKind::Json => "json",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigNotFound { .. } | Error::ConfigParse(_) | Error::ConfigInvalid { .. } => {
                ErrorKind::Config
            }
            Error::Open { .. } => ErrorKind::Open,
            Error::Seek { .. } => ErrorKind::Seek,
            Error::Read { .. } => ErrorKind::Read,
            Error::Publish { .. } => ErrorKind::Publish,
            Error::Flush { .. } => ErrorKind::Flush,
            Error::Commit { .. } => ErrorKind::Commit,
            Error::OffsetRead { .. } => ErrorKind::OffsetRead,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Open and seek failures are never transient: resuming from the wrong
    /// place would break the delivery guarantee.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Read { transient, .. } | Error::Publish { transient, .. } => *transient,
            Error::Flush { .. }
            | Error::Commit { .. }
            | Error::OffsetRead { .. }
            | Error::Timeout { .. } => true,
            Error::Io(e) => io_is_transient(e),
            _ => false,
        }
    }

    /// Build a read error from an IO failure, keeping its retry classification
    pub fn read_io(err: std::io::Error) -> Self {
        Error::Read {
            transient: io_is_transient(&err),
            message: err.to_string(),
        }
    }

    /// Build a publish error from an IO failure, keeping its retry classification
    pub fn publish_io(err: std::io::Error) -> Self {
        Error::Publish {
            transient: io_is_transient(&err),
            message: err.to_string(),
        }
    }
}

fn io_is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind as Io;
    matches!(
        err.kind(),
        Io::Interrupted
            | Io::WouldBlock
            | Io::TimedOut
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::BrokenPipe
    )
}
