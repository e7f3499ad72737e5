//! Payment Error Types

use commission_core::LedgerError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// seQura merchant API error
    #[error("seQura error: {0}")]
    Sequra(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Ledger rejected the change
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error talking to a gateway
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Stripe(_) | PaymentError::Sequra(_) | PaymentError::Network(_) => true,
            PaymentError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Stripe(_) | PaymentError::Sequra(_) | PaymentError::Network(_) => {
                "The payment gateway could not be reached. Please try again.".into()
            }
            PaymentError::WebhookSignature(_) => "Invalid webhook signature.".into(),
            PaymentError::WebhookParse(_) => "Malformed webhook payload.".into(),
            PaymentError::Ledger(e) => e.user_message(),
            PaymentError::Config(_) => "Service configuration error.".into(),
        }
    }
}
