//! Request options shared by the connection API

use serde::{Deserialize, Serialize};
use std::time::Duration;
use ziapi_protocol::Value;

pub use ziapi_protocol::{AsyncCommandKind as AsyncCommand, Tag};

/// How a set is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SetMode {
    /// Return once the request is written
    #[default]
    Async,
    /// Wait for the server and return the effective value
    Sync,
}

/// Result of a set
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    Accepted,
    /// Value after server-side clamping
    Effective(Value),
}

impl SetOutcome {
    pub fn effective(&self) -> Option<&Value> {
        match self {
            SetOutcome::Effective(v) => Some(v),
            SetOutcome::Accepted => None,
        }
    }
}

/// Wait bound of blocking calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    Immediate,
    After(Duration),
}

impl Timeout {
    /// Integer convention: negative blocks forever, zero returns at once.
    pub fn from_ms(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Timeout::Infinite,
            0 => Timeout::Immediate,
            ms => Timeout::After(Duration::from_millis(ms as u64)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::Immediate
        } else {
            Timeout::After(d)
        }
    }
}
