//! Tether Runtime
//!
//! This crate runs source connectors: it drives the read → publish → commit
//! loop and persists resume positions in an offset store.
//!
//! # Features
//!
//! - Connector lifecycle controller with graceful stop
//! - Flush-before-commit scheduling on a wall-clock interval
//! - Append-only file and in-memory offset stores
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_runtime::Runtime;
//!
//! let runtime = Runtime::new(config);
//! let summary = runtime.run(|handle| install_ctrl_c(handle)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod controller;
pub mod engine;
pub mod error;
pub mod offsets;

pub use controller::{Connector, ConnectorState, RunSummary, StopHandle};
pub use engine::Runtime;
pub use error::{ConnectorFailure, Error, Result};
pub use offsets::{
    CommitRecord, FileOffsetStore, MemoryOffsetStore, OffsetStore, build_offset_store,
};
