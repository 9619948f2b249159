//! Billing error taxonomy.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stripe error: {0}")]
    Stripe(String),

    #[error("Registrar error: {0}")]
    Registrar(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mailbox address already exists: {0}")]
    MailboxExists(String),

    #[error("No active subscription for mailbox type {0}")]
    NoActiveSubscription(String),

    #[error("All subscriptions are at capacity")]
    NoCapacity,

    #[error("Insufficient wallet balance: required {required_cents} cents, available {available_cents} cents")]
    InsufficientBalance {
        required_cents: i64,
        available_cents: i64,
    },

    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        Self::Stripe(e.to_string())
    }
}

impl From<stripe::ParseIdError> for BillingError {
    fn from(e: stripe::ParseIdError) -> Self {
        Self::Validation(format!("invalid Stripe identifier: {e}"))
    }
}
