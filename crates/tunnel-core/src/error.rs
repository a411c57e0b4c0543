//! Error Types

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invoice registry is at capacity
    #[error("Registry full: {0} pending invoices")]
    Capacity(usize),

    /// No pending request for a payment identifier
    #[error("Unknown payment id: {0}")]
    NotFound(String),

    /// A collaborator call failed (payment API, VPN manager, rate source)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Request rejected before any collaborator was contacted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Renewal updated the expiry but a follow-up step failed
    #[error("Partial failure: {0}")]
    PartialFailure(String),

    /// Unknown region code
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Check if a later trigger (webhook retry, client re-check) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Upstream(_) | StoreError::PartialFailure(_)
        )
    }

    /// Convert to a message safe to push to the browser
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Capacity(_) => {
                "Too many open invoices right now. Please try again in a few minutes.".into()
            }
            StoreError::NotFound(_) => "No open invoice found for this payment.".into(),
            StoreError::Upstream(_) => {
                "An upstream service failed. Your payment is safe; please retry.".into()
            }
            StoreError::Validation(msg) => format!("Invalid request: {msg}"),
            StoreError::PartialFailure(_) => {
                "Your renewal was only partially applied. Please contact support.".into()
            }
            StoreError::UnknownRegion(region) => format!("Unknown server region '{region}'."),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Other(err.to_string())
    }
}
