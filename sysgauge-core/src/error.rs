//! Error taxonomy for sampling, configuration and rendering.
//!
//! Nothing here is fatal to the process. Callers degrade to a "no data this
//! tick" state and surface the error once.

use crate::metrics::MetricKind;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The OS source for a metric could not be read or parsed.
    #[error("failed to sample {metric}: {message}")]
    Sample {
        metric: MetricKind,
        message: String,
    },

    #[error("network interface '{0}' not found")]
    InterfaceNotFound(String),

    /// An optional external tool or sensor is missing on this system.
    #[error("'{0}' is not available on this system")]
    CapabilityUnavailable(String),

    /// Rejected before any state was mutated; the previous value is kept.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidConfiguration {
        key: String,
        message: String,
    },

    /// A monotonic counter went backwards between two reads.
    #[error("counter for '{counter}' went backwards ({previous} -> {current})")]
    CounterWraparound {
        counter: String,
        previous: u64,
        current: u64,
    },

    /// An external read-only query ran but did not succeed.
    #[error("'{program}' failed: {message}")]
    Command {
        program: String,
        message: String,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl MonitorError {
    pub fn sample(metric: MetricKind, message: impl Into<String>) -> Self {
        MonitorError::Sample {
            metric,
            message: message.into(),
        }
    }

    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        MonitorError::InvalidConfiguration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable key used to de-duplicate repeated warnings across ticks.
    pub fn kind_key(&self) -> &'static str {
        match self {
            MonitorError::Sample { .. } => "sample",
            MonitorError::InterfaceNotFound(_) => "interface",
            MonitorError::CapabilityUnavailable(_) => "capability",
            MonitorError::InvalidConfiguration { .. } => "config",
            MonitorError::CounterWraparound { .. } => "wraparound",
            MonitorError::Command { .. } => "command",
            MonitorError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
