//! Records and position indices
//!
//! A [`PositionIndex`] is an opaque cursor produced by a source adapter. It
//! always denotes "read cursor after record N": seeking to the index returned
//! after reading record N makes the next read return record N + 1.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A key/value pair read from a source and forwarded to a publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key
    pub key: Value,

    /// Record value
    pub value: Value,
}

impl Record {
    /// Create a new record
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Opaque, source-defined resume point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionIndex(Value);

impl PositionIndex {
    /// Wrap a source-defined value
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Interpret the index as an unsigned offset, if it is one
    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }
}

impl From<u64> for PositionIndex {
    fn from(offset: u64) -> Self {
        Self(Value::from(offset))
    }
}

impl From<Value> for PositionIndex {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for PositionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of asking a source for its next record
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The next record in source order
    Record(Record),

    /// No further data is currently available. Not an error.
    EndOfData,
}
