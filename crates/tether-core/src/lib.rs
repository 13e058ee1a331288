//! Tether Core Library
//!
//! This crate provides the building blocks of a resumable source connector:
//! - Records and opaque position indices
//! - Configuration parsing and validation
//! - Source adapter and record publisher traits, with file and in-memory
//!   implementations
//! - Retry/backoff policy shared by the runtime
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│  Connector  │────▶│  Publisher  │
//! │   Adapter   │     │  (runtime)  │     │             │
//! └─────────────┘     └──────┬──────┘     └─────────────┘
//!                            │ commit(index)
//!                     ┌──────▼──────┐
//!                     │ OffsetStore │
//!                     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::Config;
//!
//! let config = Config::from_yaml_file("./config.yaml")?;
//! let source = config.source.build();
//! let publisher = config.publisher.build();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectors;
pub mod error;
pub mod record;
pub mod retry;

pub use config::{Config, ConnectorConfig, EndOfDataPolicy, OffsetStoreConfig};
pub use connectors::{RecordPublisher, SourceAdapter};
pub use error::{Error, ErrorKind, Result};
pub use record::{PositionIndex, ReadOutcome, Record};
pub use retry::{Backoff, RetryConfig};
