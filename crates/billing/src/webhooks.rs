//! Stripe webhook handling.
//!
//! The reconciler is the only place purchases paid through Stripe become
//! grants. Signature failure is the only 400; once an event is verified the
//! endpoint answers 200 and any handling failure is recorded on the event
//! row for replay analysis.

use std::collections::HashMap;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use mailstack_shared::{MailboxType, OrderType, PaymentMethod, SubscriptionStatus};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, Event, EventObject, EventType, Invoice, SubscriptionId,
    SubscriptionStatus as StripeSubStatus, Webhook,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::checkout::checkout_type;
use crate::error::{BillingError, BillingResult};
use crate::orders;
use crate::prewarm::PrewarmService;
use crate::registrar::{DomainQuote, DomainRegistrar};
use crate::subscriptions::{add_one_month, Subscription, SubscriptionService};
use crate::domains::DomainService;
use crate::wallet::WalletEngine;

type HmacSha256 = Hmac<Sha256>;

/// Webhook handler for Stripe events.
pub struct WebhookHandler<R: DomainRegistrar> {
    pool: PgPool,
    webhook_secret: String,
    subscriptions: SubscriptionService,
    prewarm: PrewarmService,
    domains: DomainService<R>,
    wallet: WalletEngine,
}

impl<R: DomainRegistrar> WebhookHandler<R> {
    pub fn new(
        client: stripe::Client,
        pool: PgPool,
        webhook_secret: String,
        domains: DomainService<R>,
    ) -> Self {
        let subscriptions = SubscriptionService::new(client, pool.clone());
        let prewarm = PrewarmService::new(pool.clone());
        let wallet = WalletEngine::new(pool.clone());
        Self {
            pool,
            webhook_secret,
            subscriptions,
            prewarm,
            domains,
            wallet,
        }
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Uses manual signature verification as a fallback to work around
    /// async-stripe version incompatibility with newer Stripe API versions.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        match Webhook::construct_event(payload, signature, &self.webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Parse the signature header: t=timestamp,v1=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        // Check timestamp tolerance (5 minutes)
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| {
                tracing::error!("System time error: {}", e);
                BillingError::WebhookSignatureInvalid
            })?
            .as_secs() as i64;

        if (now - timestamp).abs() > 300 {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);

        if !verify_v1_signature(secret_key, timestamp, payload, &v1_signature) {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// Atomic idempotency: the INSERT...ON CONFLICT...RETURNING claim means
    /// only one concurrent delivery of an event id can win processing
    /// rights. Events stuck in 'processing' past the timeout can be
    /// reclaimed.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        const PROCESSING_TIMEOUT_MINUTES: i32 = 5;

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (id, stripe_event_id, event_type, processing_result, processing_started_at, created_at)
            VALUES ($1, $2, $3, 'processing', NOW(), NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE stripe_webhook_events.processing_result = 'processing'
              AND stripe_webhook_events.processing_started_at < NOW() - $4 * INTERVAL '1 minute'
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(event_id = %event_id, error = %e, "Failed to claim webhook event");
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, skipping"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event_type_str,
            event_id = %event_id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("completed".to_string(), None),
            Err(e) => ("failed".to_string(), Some(e.to_string())),
        };

        let update = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = update {
            // The outcome record keeps duplicates from re-running the
            // event, so a failed write is worth one retry.
            tracing::warn!(event_id = %event_id, error = %e, "Failed to record webhook outcome, retrying");
            if let Err(retry_err) = sqlx::query(
                r#"
                UPDATE stripe_webhook_events
                SET processing_result = $1, error_message = $2
                WHERE stripe_event_id = $3
                "#,
            )
            .bind(&processing_result)
            .bind(&error_message)
            .bind(&event_id)
            .execute(&self.pool)
            .await
            {
                tracing::error!(
                    event_id = %event_id,
                    retry_error = %retry_err,
                    "Failed to record webhook outcome after retry; event may look stuck in processing"
                );
            }
        }

        result
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }
            EventType::CheckoutSessionExpired => {
                self.handle_checkout_expired(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event_owned).await?;
            }
            EventType::InvoicePaid | EventType::InvoicePaymentSucceeded => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = extract_checkout_session(event)?;
        let session_id = session.id.to_string();

        let metadata = match &session.metadata {
            Some(m) if !m.is_empty() => m.clone(),
            _ => {
                tracing::warn!(session_id = %session_id, "Checkout session without metadata");
                return Ok(());
            }
        };

        let purchase_type = match metadata.get("type") {
            Some(t) => t.clone(),
            None => {
                tracing::warn!(session_id = %session_id, "Checkout session without type tag");
                return Ok(());
            }
        };
        let user_id = user_id_from_metadata(&metadata)?;

        match purchase_type.as_str() {
            checkout_type::WALLET_TOPUP => {
                self.complete_wallet_topup(user_id, &session, &metadata).await?;
            }
            checkout_type::DOMAIN_PURCHASE => {
                self.complete_domain_purchase(user_id, &session, &metadata).await?;
            }
            checkout_type::MAILBOX_SUBSCRIPTION => {
                self.complete_plan_purchase(user_id, &session, &metadata).await?;
            }
            checkout_type::MAILBOX_ADDON => {
                self.complete_addon_purchase(user_id, &session, &metadata).await?;
            }
            checkout_type::PRE_WARM_MAILBOX => {
                self.complete_prewarm_purchase(user_id, &session, &metadata).await?;
            }
            other => {
                tracing::warn!(
                    session_id = %session_id,
                    purchase_type = %other,
                    "Unknown checkout type tag"
                );
                return Ok(());
            }
        }

        self.mark_history(&session_id, "completed").await;
        Ok(())
    }

    async fn complete_wallet_topup(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        // Charged amount wins over the metadata echo.
        let amount_cents = session
            .amount_total
            .or_else(|| metadata.get("amount_cents").and_then(|v| v.parse().ok()))
            .ok_or_else(|| {
                BillingError::Internal("top-up session without an amount".to_string())
            })?;

        let order_ref = Uuid::new_v4();
        self.wallet
            .credit(user_id, amount_cents, "wallet top-up", Some(order_ref))
            .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::WalletTopup,
            amount_cents,
            PaymentMethod::Stripe,
            Some(order_ref),
        )
        .await?;

        tracing::info!(user_id = %user_id, amount_cents = amount_cents, "Wallet top-up applied");
        Ok(())
    }

    async fn complete_domain_purchase(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let domains = string_list_from_metadata(metadata, "domains")?;
        let years: u32 = metadata
            .get("years")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let quotes: Vec<DomainQuote> = self.domains.quote(&domains, years).await?;
        let report = self.domains.register_purchased(user_id, &quotes).await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::DomainPurchase,
            session.amount_total.unwrap_or(0),
            PaymentMethod::Stripe,
            None,
        )
        .await?;

        if !report.failed.is_empty() {
            tracing::error!(
                user_id = %user_id,
                failed = report.failed.len(),
                "Paid domain purchase had registration failures"
            );
        }

        Ok(())
    }

    async fn complete_plan_purchase(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let plan_id = metadata
            .get("plan_id")
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| BillingError::Internal("plan_id missing from metadata".to_string()))?;
        let plan = self.subscriptions.get_plan(plan_id).await?;

        let stripe_subscription_id = subscription_id_from_session(session).ok_or_else(|| {
            BillingError::Internal("plan checkout completed without a subscription".to_string())
        })?;

        let period_end = self
            .remote_period_end(&stripe_subscription_id)
            .await;

        self.subscriptions
            .apply_plan_subscription(user_id, &plan, &stripe_subscription_id, period_end)
            .await?;

        Ok(())
    }

    async fn complete_addon_purchase(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let quantity: i32 = metadata
            .get("quantity")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| BillingError::Internal("quantity missing from metadata".to_string()))?;
        let unit_price_cents: i64 = metadata
            .get("unit_price_cents")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                BillingError::Internal("unit_price_cents missing from metadata".to_string())
            })?;
        let mailbox_type = metadata
            .get("mailbox_type")
            .and_then(|v| MailboxType::from_str(v).ok())
            .unwrap_or(MailboxType::Gsuite);

        let stripe_subscription_id = subscription_id_from_session(session);
        let period_end = match &stripe_subscription_id {
            Some(id) => self.remote_period_end(id).await,
            None => None,
        };

        self.subscriptions
            .grant_addon(
                user_id,
                mailbox_type,
                quantity,
                unit_price_cents,
                stripe_subscription_id.as_deref(),
                period_end,
            )
            .await?;

        Ok(())
    }

    async fn complete_prewarm_purchase(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
        metadata: &HashMap<String, String>,
    ) -> BillingResult<()> {
        let emails = string_list_from_metadata(metadata, "emails")?;
        let unit_price_cents: i64 = metadata
            .get("unit_price_cents")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let stripe_subscription_id = subscription_id_from_session(session);

        let subscription = self
            .prewarm
            .create_subscription(
                Uuid::new_v4(),
                user_id,
                stripe_subscription_id.as_deref(),
                unit_price_cents,
            )
            .await?;

        let claimed = self
            .prewarm
            .claim_for_subscription(user_id, subscription.id, &emails)
            .await?;
        let subscription = self
            .prewarm
            .finalize_subscription(subscription.id, claimed.len() as i32)
            .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::PrewarmPurchase,
            session.amount_total.unwrap_or(0),
            PaymentMethod::Stripe,
            Some(subscription.id),
        )
        .await?;

        if claimed.len() != emails.len() {
            tracing::error!(
                user_id = %user_id,
                requested = emails.len(),
                claimed = claimed.len(),
                "Paid pre-warm purchase could not claim all mailboxes"
            );
        }

        Ok(())
    }

    /// An expired session only touches the pending journal; nothing was
    /// granted, so there is nothing to revoke.
    async fn handle_checkout_expired(&self, event: Event) -> BillingResult<()> {
        let session = extract_checkout_session(event)?;

        sqlx::query(
            r#"
            UPDATE transaction_history
            SET status = 'expired', updated_at = NOW()
            WHERE stripe_session_id = $1 AND status = 'pending'
            "#,
        )
        .bind(session.id.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(session_id = %session.id, "Checkout session expired");
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let remote = extract_subscription(event)?;
        let stripe_id = remote.id.to_string();

        let local = match self.subscriptions.find_by_stripe_id(&stripe_id).await? {
            Some(s) => s,
            None => {
                tracing::info!(
                    stripe_subscription_id = %stripe_id,
                    "Deleted subscription has no local record"
                );
                return Ok(());
            }
        };

        self.subscriptions
            .set_status(local.id, SubscriptionStatus::Cancelled)
            .await?;
        self.subscriptions.cancel_cascade(&local).await?;

        tracing::info!(
            subscription_id = %local.id,
            stripe_subscription_id = %stripe_id,
            "Subscription deleted at provider, cascade applied"
        );
        Ok(())
    }

    /// Mirrors the cancel_at_period_end flag into the local status. Other
    /// kinds of update are left to the invoice events.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let remote = extract_subscription(event)?;
        let stripe_id = remote.id.to_string();

        let local = match self.subscriptions.find_by_stripe_id(&stripe_id).await? {
            Some(s) => s,
            None => return Ok(()),
        };

        match subscription_update_action(
            remote.cancel_at_period_end,
            remote.status == StripeSubStatus::Active,
            &local.status,
        ) {
            SubscriptionUpdateAction::FlagPeriodEndCancel => {
                self.subscriptions
                    .set_status(local.id, SubscriptionStatus::CancelAtPeriodEnd)
                    .await?;
            }
            SubscriptionUpdateAction::Reactivate => {
                // A resumed subscription also gets a fresh period; leaving
                // renews_on in the past would make the row look overdue
                // until the next invoice arrives.
                self.subscriptions
                    .mark_renewed(local.id, add_one_month(OffsetDateTime::now_utc()))
                    .await?;
            }
            SubscriptionUpdateAction::Ignore => {}
        }

        Ok(())
    }

    /// A paid invoice advances the renewal date. The new date comes from
    /// the provider subscription's period end, then the invoice line
    /// period, then a computed interval as the last resort.
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;

        let stripe_id = match &invoice.subscription {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(s)) => s.id.to_string(),
            None => {
                tracing::debug!(invoice_id = %invoice.id, "Invoice without subscription, ignoring");
                return Ok(());
            }
        };

        let local = match self.subscriptions.find_by_stripe_id(&stripe_id).await? {
            Some(s) => s,
            None => {
                tracing::info!(
                    stripe_subscription_id = %stripe_id,
                    "Paid invoice for unknown subscription"
                );
                return Ok(());
            }
        };

        let renews_on = match self.remote_period_end(&stripe_id).await {
            Some(end) => end,
            None => match invoice_period_end(&invoice) {
                Some(end) => end,
                None => self.computed_period_end(&local).await,
            },
        };

        self.subscriptions.mark_renewed(local.id, renews_on).await?;

        orders::record(
            &self.pool,
            local.user_id,
            OrderType::Renewal,
            invoice.amount_paid.unwrap_or(0),
            PaymentMethod::Stripe,
            Some(local.id),
        )
        .await?;

        tracing::info!(
            subscription_id = %local.id,
            renews_on = %renews_on,
            "Subscription renewed from paid invoice"
        );
        Ok(())
    }

    /// Payment failures are Stripe's to retry; the subscription stays
    /// untouched until `customer.subscription.deleted` settles it.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;
        tracing::warn!(
            invoice_id = %invoice.id,
            amount_due = invoice.amount_due.unwrap_or(0),
            "Invoice payment failed, leaving status to provider retry policy"
        );
        Ok(())
    }

    async fn remote_period_end(&self, stripe_subscription_id: &str) -> Option<OffsetDateTime> {
        let id = SubscriptionId::from_str(stripe_subscription_id).ok()?;
        match stripe::Subscription::retrieve(self.subscriptions_client(), &id, &[]).await {
            Ok(remote) => OffsetDateTime::from_unix_timestamp(remote.current_period_end).ok(),
            Err(e) => {
                tracing::warn!(
                    stripe_subscription_id = %stripe_subscription_id,
                    error = %e,
                    "Failed to retrieve subscription for period end"
                );
                None
            }
        }
    }

    async fn computed_period_end(&self, local: &Subscription) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        if let Some(plan_id) = local.plan_id {
            if let Ok(plan) = self.subscriptions.get_plan(plan_id).await {
                if plan.interval == "year" {
                    return now + time::Duration::days(365);
                }
            }
        }
        add_one_month(now)
    }

    async fn mark_history(&self, session_id: &str, status: &str) {
        let result = sqlx::query(
            r#"
            UPDATE transaction_history
            SET status = $1, updated_at = NOW()
            WHERE stripe_session_id = $2
            "#,
        )
        .bind(status)
        .bind(session_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Failed to update transaction history"
            );
        }
    }

    fn subscriptions_client(&self) -> &stripe::Client {
        self.subscriptions.client()
    }
}

fn extract_checkout_session(event: Event) -> BillingResult<CheckoutSession> {
    match event.data.object {
        EventObject::CheckoutSession(session) => Ok(session),
        _ => Err(BillingError::Internal(
            "expected CheckoutSession object".to_string(),
        )),
    }
}

fn extract_subscription(event: Event) -> BillingResult<stripe::Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::Internal(
            "expected Subscription object".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::Internal("expected Invoice object".to_string())),
    }
}

pub(crate) fn user_id_from_metadata(metadata: &HashMap<String, String>) -> BillingResult<Uuid> {
    metadata
        .get("user_id")
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| BillingError::Internal("user_id not found in metadata".to_string()))
}

/// Decode a JSON string list stashed in session metadata.
pub(crate) fn string_list_from_metadata(
    metadata: &HashMap<String, String>,
    key: &str,
) -> BillingResult<Vec<String>> {
    let raw = metadata
        .get(key)
        .ok_or_else(|| BillingError::Internal(format!("{key} not found in metadata")))?;
    let list: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| BillingError::Internal(format!("invalid {key} metadata: {e}")))?;
    if list.is_empty() {
        return Err(BillingError::Internal(format!("{key} metadata is empty")));
    }
    Ok(list)
}

fn subscription_id_from_session(session: &CheckoutSession) -> Option<String> {
    match &session.subscription {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(s)) => Some(s.id.to_string()),
        None => None,
    }
}

fn invoice_period_end(invoice: &Invoice) -> Option<OffsetDateTime> {
    invoice
        .period_end
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

/// Check a `v1` hex signature over `timestamp.payload`.
///
/// `Mac::verify_slice` compares in constant time, so the signature check
/// leaks nothing through timing.
pub(crate) fn verify_v1_signature(
    secret_key: &str,
    timestamp: i64,
    payload: &str,
    v1_hex: &str,
) -> bool {
    let Ok(signature) = hex::decode(v1_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// What a `customer.subscription.updated` event should do to the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionUpdateAction {
    FlagPeriodEndCancel,
    Reactivate,
    Ignore,
}

pub(crate) fn subscription_update_action(
    remote_cancel_at_period_end: bool,
    remote_is_active: bool,
    local_status: &str,
) -> SubscriptionUpdateAction {
    if remote_cancel_at_period_end && local_status == SubscriptionStatus::Active.as_str() {
        SubscriptionUpdateAction::FlagPeriodEndCancel
    } else if !remote_cancel_at_period_end
        && local_status == SubscriptionStatus::CancelAtPeriodEnd.as_str()
        && remote_is_active
    {
        SubscriptionUpdateAction::Reactivate
    } else {
        SubscriptionUpdateAction::Ignore
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn user_id_parses_from_metadata() {
        let id = Uuid::new_v4();
        let m = metadata(&[("user_id", &id.to_string())]);
        assert_eq!(user_id_from_metadata(&m).unwrap(), id);
    }

    #[test]
    fn user_id_missing_or_malformed_is_an_error() {
        assert!(user_id_from_metadata(&metadata(&[])).is_err());
        assert!(user_id_from_metadata(&metadata(&[("user_id", "not-a-uuid")])).is_err());
    }

    #[test]
    fn string_list_round_trips() {
        let m = metadata(&[("domains", r#"["a.com","b.com"]"#)]);
        assert_eq!(
            string_list_from_metadata(&m, "domains").unwrap(),
            vec!["a.com".to_string(), "b.com".to_string()]
        );
    }

    #[test]
    fn string_list_rejects_empty_and_malformed() {
        assert!(string_list_from_metadata(&metadata(&[("domains", "[]")]), "domains").is_err());
        assert!(string_list_from_metadata(&metadata(&[("domains", "a.com")]), "domains").is_err());
        assert!(string_list_from_metadata(&metadata(&[]), "domains").is_err());
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn v1_signature_accepts_the_right_mac() {
        let sig = sign("secret", 1_700_000_000, r#"{"id":"evt_1"}"#);
        assert!(verify_v1_signature(
            "secret",
            1_700_000_000,
            r#"{"id":"evt_1"}"#,
            &sig
        ));
    }

    #[test]
    fn v1_signature_rejects_tampering() {
        let sig = sign("secret", 1_700_000_000, r#"{"id":"evt_1"}"#);
        assert!(!verify_v1_signature("secret", 1_700_000_000, r#"{"id":"evt_2"}"#, &sig));
        assert!(!verify_v1_signature("secret", 1_700_000_001, r#"{"id":"evt_1"}"#, &sig));
        assert!(!verify_v1_signature("other", 1_700_000_000, r#"{"id":"evt_1"}"#, &sig));
        assert!(!verify_v1_signature("secret", 1_700_000_000, r#"{"id":"evt_1"}"#, "not-hex"));
    }

    #[test]
    fn subscription_update_transitions() {
        use SubscriptionUpdateAction::*;
        // cancel_at_period_end raised on an active row
        assert_eq!(subscription_update_action(true, true, "active"), FlagPeriodEndCancel);
        // cancellation withdrawn on a flagged row
        assert_eq!(
            subscription_update_action(false, true, "cancel_at_period_end"),
            Reactivate
        );
        // no double-flag, no resurrecting cancelled rows
        assert_eq!(subscription_update_action(true, true, "cancel_at_period_end"), Ignore);
        assert_eq!(subscription_update_action(false, true, "active"), Ignore);
        assert_eq!(subscription_update_action(false, false, "cancel_at_period_end"), Ignore);
        assert_eq!(subscription_update_action(false, true, "cancelled"), Ignore);
    }
}
