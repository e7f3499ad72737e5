//! Ledger Error Types

use thiserror::Error;

use crate::commission::{CommissionAction, CommissionStatus};

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by the commission ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Caller is not allowed to perform the action
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Action is not valid from the current commission status
    #[error("Cannot {action} a commission in status {from}")]
    InvalidTransition {
        from: CommissionStatus,
        action: CommissionAction,
    },

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Uniqueness constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backing storage failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::NotFound { entity, .. } => format!("The requested {entity} does not exist."),
            LedgerError::Forbidden(_) => "You are not allowed to perform this action.".into(),
            LedgerError::InvalidTransition { from, action } => {
                format!("A commission in status '{from}' cannot be {}.", action.past_tense())
            }
            LedgerError::Validation(msg) => msg.clone(),
            LedgerError::Conflict(msg) => msg.clone(),
            LedgerError::Storage(_) => "A storage error occurred. Please try again.".into(),
        }
    }
}
