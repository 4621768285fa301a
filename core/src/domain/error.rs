use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy a Collector reports (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Network,
    Parse,
    Quota,
}

impl ErrorClass {
    /// Whether the scheduler should retry within the same tick.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Quota)
    }
}

/// Error returned by `Collector::collect`.
#[derive(Debug, Error)]
#[error("{class:?} error: {message}")]
pub struct CollectError {
    pub class: ErrorClass,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl CollectError {
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Config,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Network,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Parse,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn quota(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            class: ErrorClass::Quota,
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class.is_transient()
    }
}
