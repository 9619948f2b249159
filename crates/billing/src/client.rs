//! Stripe client construction from environment configuration.

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Base URL the Checkout success/cancel redirects point at.
    pub frontend_url: String,
}

impl StripeConfig {
    /// Load from `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET` and
    /// `FRONTEND_URL`. The two Stripe values are required; callers treat
    /// the error as "billing not configured" and degrade.
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Internal("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Internal("STRIPE_WEBHOOK_SECRET not set".to_string()))?;
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        if secret_key.is_empty() {
            return Err(BillingError::Internal("STRIPE_SECRET_KEY is empty".to_string()));
        }

        Ok(Self {
            secret_key,
            webhook_secret,
            frontend_url,
        })
    }

    pub fn client(&self) -> stripe::Client {
        stripe::Client::new(self.secret_key.clone())
    }
}
