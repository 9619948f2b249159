//! Stripe Checkout session builders.
//!
//! Nothing is granted from this module. Every session carries a `type` tag
//! plus whatever the webhook handler needs to apply the purchase once
//! `checkout.session.completed` arrives, and a `pending` row in
//! `transaction_history` keyed by the session id.

use std::collections::HashMap;

use mailstack_shared::MailboxType;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, CreateCustomer, Currency, Customer,
    CustomerId,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::pricing::{self, MIN_TOPUP_CENTS};
use crate::subscriptions::Plan;

/// Metadata tag values dispatched on by the webhook handler.
pub mod checkout_type {
    pub const DOMAIN_PURCHASE: &str = "domain_purchase";
    pub const WALLET_TOPUP: &str = "wallet_topup";
    pub const MAILBOX_SUBSCRIPTION: &str = "mailbox_subscription";
    pub const MAILBOX_ADDON: &str = "mailbox_addon";
    pub const PRE_WARM_MAILBOX: &str = "pre_warm_mailbox";
}

/// A created session, enough for the caller to redirect.
#[derive(Debug, serde::Serialize)]
pub struct CheckoutRedirect {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    client: stripe::Client,
    pool: PgPool,
    frontend_url: String,
}

impl CheckoutService {
    pub fn new(client: stripe::Client, pool: PgPool, frontend_url: String) -> Self {
        Self {
            client,
            pool,
            frontend_url,
        }
    }

    /// Reuse the stored Stripe customer or create one from the user's email.
    pub async fn get_or_create_customer(&self, user_id: Uuid) -> BillingResult<CustomerId> {
        let row: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT stripe_customer_id, email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let (existing, email) =
            row.ok_or_else(|| BillingError::NotFound(format!("user {user_id}")))?;

        if let Some(id) = existing {
            if let Ok(parsed) = id.parse::<CustomerId>() {
                return Ok(parsed);
            }
            tracing::warn!(user_id = %user_id, "Stored Stripe customer id is invalid, recreating");
        }

        let mut params = CreateCustomer::new();
        params.email = Some(&email);
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        params.metadata = Some(metadata);

        let customer = Customer::create(&self.client, params).await?;

        sqlx::query("UPDATE users SET stripe_customer_id = $1 WHERE id = $2")
            .bind(customer.id.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(customer.id)
    }

    /// Checkout for a base plan. Subscription mode against the plan's
    /// catalog price.
    pub async fn plan_session(&self, user_id: Uuid, plan: &Plan) -> BillingResult<CheckoutRedirect> {
        if !plan.active {
            return Err(BillingError::Validation(format!(
                "plan {} is not available",
                plan.name
            )));
        }

        let customer = self.get_or_create_customer(user_id).await?;
        let success_url = self.success_url();
        let cancel_url = self.cancel_url();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(plan.stripe_price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata([
            ("type", checkout_type::MAILBOX_SUBSCRIPTION.to_string()),
            ("user_id", user_id.to_string()),
            ("plan_id", plan.id.to_string()),
        ]));

        let session = CheckoutSession::create(&self.client, params).await?;
        self.record_pending(
            user_id,
            &session,
            checkout_type::MAILBOX_SUBSCRIPTION,
            plan.price_cents,
            serde_json::json!({ "plan_id": plan.id }),
        )
        .await;

        Ok(redirect(session))
    }

    /// Checkout for additional mailboxes on top of a plan. Recurring
    /// monthly price built inline from the resolved unit price.
    pub async fn addon_session(
        &self,
        user_id: Uuid,
        mailbox_type: MailboxType,
        quantity: i64,
    ) -> BillingResult<CheckoutRedirect> {
        if quantity <= 0 {
            return Err(BillingError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let (unit_price, source) =
            pricing::addon_unit_price_cents(&self.pool, user_id, mailbox_type).await?;
        tracing::debug!(
            user_id = %user_id,
            unit_price_cents = unit_price,
            source = ?source,
            "Resolved addon unit price"
        );

        let customer = self.get_or_create_customer(user_id).await?;
        let success_url = self.success_url();
        let cancel_url = self.cancel_url();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(unit_price),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: format!("Additional {mailbox_type} mailbox"),
                    ..Default::default()
                }),
                recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                    interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                    interval_count: Some(1),
                }),
                ..Default::default()
            }),
            quantity: Some(quantity as u64),
            ..Default::default()
        }]);
        params.metadata = Some(metadata([
            ("type", checkout_type::MAILBOX_ADDON.to_string()),
            ("user_id", user_id.to_string()),
            ("mailbox_type", mailbox_type.as_str().to_string()),
            ("quantity", quantity.to_string()),
            ("unit_price_cents", unit_price.to_string()),
        ]));

        let session = CheckoutSession::create(&self.client, params).await?;
        self.record_pending(
            user_id,
            &session,
            checkout_type::MAILBOX_ADDON,
            unit_price * quantity,
            serde_json::json!({
                "mailbox_type": mailbox_type.as_str(),
                "quantity": quantity,
                "unit_price_cents": unit_price,
            }),
        )
        .await;

        Ok(redirect(session))
    }

    /// One-off payment that credits the wallet on completion.
    pub async fn topup_session(
        &self,
        user_id: Uuid,
        amount_cents: i64,
    ) -> BillingResult<CheckoutRedirect> {
        if amount_cents < MIN_TOPUP_CENTS {
            return Err(BillingError::Validation(format!(
                "minimum top-up is {MIN_TOPUP_CENTS} cents"
            )));
        }

        let customer = self.get_or_create_customer(user_id).await?;
        let success_url = self.success_url();
        let cancel_url = self.cancel_url();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer = Some(customer);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![one_off_item("Wallet top-up", amount_cents, 1)]);
        params.metadata = Some(metadata([
            ("type", checkout_type::WALLET_TOPUP.to_string()),
            ("user_id", user_id.to_string()),
            ("amount_cents", amount_cents.to_string()),
        ]));

        let session = CheckoutSession::create(&self.client, params).await?;
        self.record_pending(
            user_id,
            &session,
            checkout_type::WALLET_TOPUP,
            amount_cents,
            serde_json::json!({ "amount_cents": amount_cents }),
        )
        .await;

        Ok(redirect(session))
    }

    /// One-off payment for domain registration. Domains and term go into
    /// metadata; registration happens on the completed webhook.
    pub async fn domain_session(
        &self,
        user_id: Uuid,
        domains: &[String],
        years: u32,
        total_cents: i64,
    ) -> BillingResult<CheckoutRedirect> {
        if domains.is_empty() {
            return Err(BillingError::Validation("no domains given".to_string()));
        }

        let customer = self.get_or_create_customer(user_id).await?;
        let success_url = self.success_url();
        let cancel_url = self.cancel_url();

        let domains_json = serde_json::to_string(domains)
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer = Some(customer);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![one_off_item(
            &format!("Domain registration ({} domains)", domains.len()),
            total_cents,
            1,
        )]);
        params.metadata = Some(metadata([
            ("type", checkout_type::DOMAIN_PURCHASE.to_string()),
            ("user_id", user_id.to_string()),
            ("domains", domains_json.clone()),
            ("years", years.to_string()),
        ]));

        let session = CheckoutSession::create(&self.client, params).await?;
        self.record_pending(
            user_id,
            &session,
            checkout_type::DOMAIN_PURCHASE,
            total_cents,
            serde_json::json!({ "domains": domains, "years": years }),
        )
        .await;

        Ok(redirect(session))
    }

    /// Recurring purchase of specific pre-warmed mailboxes. The pool rows
    /// are claimed on the completed webhook, not here.
    pub async fn prewarm_session(
        &self,
        user_id: Uuid,
        emails: &[String],
        unit_price_cents: i64,
    ) -> BillingResult<CheckoutRedirect> {
        if emails.is_empty() {
            return Err(BillingError::Validation("no mailboxes selected".to_string()));
        }

        let customer = self.get_or_create_customer(user_id).await?;
        let success_url = self.success_url();
        let cancel_url = self.cancel_url();

        let emails_json = serde_json::to_string(emails)
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::USD,
                unit_amount: Some(unit_price_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: "Pre-warmed mailbox".to_string(),
                    ..Default::default()
                }),
                recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                    interval: CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
                    interval_count: Some(1),
                }),
                ..Default::default()
            }),
            quantity: Some(emails.len() as u64),
            ..Default::default()
        }]);
        params.metadata = Some(metadata([
            ("type", checkout_type::PRE_WARM_MAILBOX.to_string()),
            ("user_id", user_id.to_string()),
            ("emails", emails_json),
            ("unit_price_cents", unit_price_cents.to_string()),
        ]));

        let session = CheckoutSession::create(&self.client, params).await?;
        self.record_pending(
            user_id,
            &session,
            checkout_type::PRE_WARM_MAILBOX,
            unit_price_cents * emails.len() as i64,
            serde_json::json!({ "emails": emails, "unit_price_cents": unit_price_cents }),
        )
        .await;

        Ok(redirect(session))
    }

    fn success_url(&self) -> String {
        format!(
            "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.frontend_url
        )
    }

    fn cancel_url(&self) -> String {
        format!("{}/checkout/cancelled", self.frontend_url)
    }

    async fn record_pending(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        purchase_type: &str,
        amount_cents: i64,
        meta: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO transaction_history
                (id, user_id, stripe_session_id, purchase_type, amount_cents, metadata, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW(), NOW())
            ON CONFLICT (stripe_session_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(session.id.as_str())
        .bind(purchase_type)
        .bind(amount_cents)
        .bind(meta)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                user_id = %user_id,
                session_id = %session.id,
                error = %e,
                "Failed to record pending checkout"
            );
        }
    }
}

fn one_off_item(name: &str, unit_amount: i64, quantity: u64) -> CreateCheckoutSessionLineItems {
    CreateCheckoutSessionLineItems {
        price_data: Some(CreateCheckoutSessionLineItemsPriceData {
            currency: Currency::USD,
            unit_amount: Some(unit_amount),
            product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        quantity: Some(quantity),
        ..Default::default()
    }
}

fn metadata<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn redirect(session: CheckoutSession) -> CheckoutRedirect {
    CheckoutRedirect {
        session_id: session.id.to_string(),
        url: session.url,
    }
}
