//! Error types for the bridge orchestrator

use rust_decimal::Decimal;
use thiserror::Error;

/// Bad user input. Recoverable: the user is re-prompted and the session
/// stays on the same step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be a number greater than zero")]
    InvalidAmount,

    #[error("destination address is not valid for the destination chain")]
    InvalidAddress,

    #[error("amount is below the minimum of {minimum}")]
    BelowMinimum { minimum: Decimal },

    #[error("amount exceeds the available {available}")]
    ExceedsAvailable { available: Decimal },
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{service} service error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("Invalid quote from {service}: {message}")]
    InvalidQuote {
        service: &'static str,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("User did not complete {step} in time or cancelled it")]
    UserTimeoutOrCancel { step: String },

    #[error("Notification delivery to user {user_id} failed: {message}")]
    NotificationDelivery { user_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event {event} is not expected while {step}")]
    UnexpectedEvent { event: String, step: String },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn bridge(message: impl Into<String>) -> Self {
        OrchestratorError::ExternalService {
            service: "bridge",
            message: message.into(),
        }
    }

    pub fn swap(message: impl Into<String>) -> Self {
        OrchestratorError::ExternalService {
            service: "swap",
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ExternalService { .. }
                | OrchestratorError::InvalidQuote { .. }
                | OrchestratorError::Database(_)
                | OrchestratorError::Store(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Database(_)
                | OrchestratorError::Store(_)
                | OrchestratorError::Internal(_)
        )
    }

    /// True for ledger and store failures
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Database(_) | OrchestratorError::Store(_)
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
