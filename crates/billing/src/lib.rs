// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Mailstack Billing Module
//!
//! Billing and provisioning core for the mailbox reseller: wallet funds,
//! subscription capacity, Stripe checkout and webhooks, domain purchases
//! and the pre-warmed mailbox pool.
//!
//! ## Features
//!
//! - **Wallet**: prepaid balance with an append-only ledger
//! - **Allocator**: FIFO mailbox slot assignment against paid capacity
//! - **Subscriptions**: plan and add-on lifecycle, wallet and Stripe rails
//! - **Checkout**: Stripe Checkout session builders with a metadata contract
//! - **Webhooks**: the only path from Stripe payment to grant
//! - **Domains**: registrar-backed domain purchase with partial results
//! - **Pre-warm pool**: warm inventory listing, purchase and claim
//! - **Invariants**: runnable read-only consistency checks

pub mod allocator;
pub mod checkout;
pub mod client;
pub mod currency;
pub mod domains;
pub mod error;
pub mod invariants;
pub mod jobs;
pub mod orders;
pub mod prewarm;
pub mod pricing;
pub mod registrar;
pub mod subscriptions;
pub mod wallet;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Allocator
pub use allocator::{Allocator, AssignMailboxRequest, Mailbox, QuotaSummary};

// Checkout
pub use checkout::{checkout_type, CheckoutRedirect, CheckoutService};

// Client
pub use client::StripeConfig;

// Currency
pub use currency::resolve_currency;

// Domains
pub use domains::{
    Domain, DomainConnectReport, DomainPurchaseReport, DomainService, FailedDomain,
};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Pre-warm pool
pub use prewarm::{PrewarmMailbox, PrewarmOffer, PrewarmPurchaseOutcome, PrewarmService};

// Pricing
pub use pricing::{
    addon_unit_price_cents, resolve_wallet_unit_price, user_override_price_cents,
    wallet_tier_price_cents, PriceSource, FALLBACK_ADDON_PRICE_CENTS, MIN_TOPUP_CENTS,
};

// Registrar
pub use registrar::{
    DomainAvailability, DomainQuote, DomainRegistrar, HttpRegistrar, RegisteredDomain,
    StaticRegistrar,
};

// Subscriptions
pub use subscriptions::{
    CancelMode, Plan, PlanChangeOutcome, RenewalSweepSummary, Subscription, SubscriptionService,
};

// Wallet
pub use wallet::{Wallet, WalletEngine, WalletTransaction};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService<R: DomainRegistrar + Clone = HttpRegistrar> {
    pub wallet: WalletEngine,
    pub allocator: Allocator,
    pub subscriptions: SubscriptionService,
    pub checkout: CheckoutService,
    pub domains: DomainService<R>,
    pub prewarm: PrewarmService,
    pub webhooks: WebhookHandler<R>,
    pub invariants: InvariantChecker,
}

impl BillingService<HttpRegistrar> {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        let registrar = HttpRegistrar::from_env()?;
        let release_on_delete = std::env::var("RELEASE_SLOT_ON_DELETE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self::new(config, pool, registrar, release_on_delete))
    }
}

impl<R: DomainRegistrar + Clone> BillingService<R> {
    /// Create a new billing service with explicit config and registrar
    pub fn new(
        config: StripeConfig,
        pool: PgPool,
        registrar: R,
        release_on_delete: bool,
    ) -> Self {
        let client = config.client();

        Self {
            wallet: WalletEngine::new(pool.clone()),
            allocator: Allocator::new(pool.clone(), release_on_delete),
            subscriptions: SubscriptionService::new(config.client(), pool.clone()),
            checkout: CheckoutService::new(
                config.client(),
                pool.clone(),
                config.frontend_url.clone(),
            ),
            domains: DomainService::new(pool.clone(), registrar.clone()),
            prewarm: PrewarmService::new(pool.clone()),
            webhooks: WebhookHandler::new(
                client,
                pool.clone(),
                config.webhook_secret.clone(),
                DomainService::new(pool.clone(), registrar),
            ),
            invariants: InvariantChecker::new(pool),
        }
    }
}
