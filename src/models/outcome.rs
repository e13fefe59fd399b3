use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ExtractionResult;

/// Why a single fetch attempt failed.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("timed out waiting for a fetch permit")]
    Timeout,

    #[error("page unavailable: {0}")]
    PageUnavailable(String),

    #[error("navigation error: {0}")]
    Navigation(String),

    #[error("page never became ready")]
    ReadinessTimeout,

    #[error("extraction timed out")]
    ExtractionTimeout,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::InvalidUrl(_) | FailureReason::Cancelled)
    }
}

/// Terminal classification of one fetch attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome {
    Success(ExtractionResult),
    Failed(FailureReason),
    SkippedClosedStore,
}

impl Outcome {
    /// Failed outcomes that the scheduler may try again.
    pub fn should_retry(&self) -> bool {
        match self {
            Outcome::Failed(reason) => reason.is_retryable(),
            _ => false,
        }
    }
}
