//! Pre-warmed mailbox inventory.
//!
//! Warm mailboxes are stocked ahead of sale. A purchase claims specific
//! pool rows; the claim is a guarded UPDATE per email, so a row sold out
//! from under a concurrent buyer simply fails to claim and is refunded.

use mailstack_shared::{MailboxType, OrderType, PaymentMethod};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::orders;
use crate::pricing;
use crate::subscriptions::{add_one_month, Subscription};
use crate::wallet::WalletEngine;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrewarmMailbox {
    pub id: Uuid,
    pub email: String,
    pub domain: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub export_id: Option<Uuid>,
    pub price_cents: i64,
    pub warmup_started_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A pool row as offered to one user, with any per-user price override
/// already applied.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrewarmOffer {
    pub id: Uuid,
    pub email: String,
    pub domain: String,
    pub effective_price_cents: i64,
    pub warmup_started_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct PrewarmPurchaseOutcome {
    pub subscription: Subscription,
    pub claimed: Vec<String>,
    pub unavailable: Vec<String>,
    pub charged_cents: i64,
}

#[derive(Clone)]
pub struct PrewarmService {
    pool: PgPool,
    wallet: WalletEngine,
}

impl PrewarmService {
    pub fn new(pool: PgPool) -> Self {
        let wallet = WalletEngine::new(pool.clone());
        Self { pool, wallet }
    }

    /// Inventory on sale to this user. Rows reserved for a specific other
    /// user are hidden; rows reserved for this user show their override
    /// price.
    pub async fn list_available(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<PrewarmOffer>> {
        let rows: Vec<PrewarmOffer> = sqlx::query_as(
            r#"
            SELECT id, email, domain,
                   COALESCE(
                       CASE WHEN specific_user_id = $1 THEN specific_user_price_cents END,
                       price_cents
                   ) AS effective_price_cents,
                   warmup_started_at
            FROM prewarm_mailboxes
            WHERE status = 'ready_for_sale'
              AND (specific_user_id IS NULL OR specific_user_id = $1)
            ORDER BY warmup_started_at ASC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_owned(&self, user_id: Uuid) -> BillingResult<Vec<PrewarmMailbox>> {
        let rows: Vec<PrewarmMailbox> = sqlx::query_as(
            r#"
            SELECT id, email, domain, status, user_id, subscription_id, export_id,
                   price_cents, warmup_started_at, created_at
            FROM prewarm_mailboxes
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Unit price for a wallet purchase of `emails`: the per-user override
    /// when every selected row carries one, the volume tier otherwise.
    pub async fn wallet_unit_price_cents(
        &self,
        user_id: Uuid,
        emails: &[String],
    ) -> BillingResult<i64> {
        let overrides: Vec<Option<i64>> = sqlx::query_scalar(
            r#"
            SELECT CASE WHEN specific_user_id = $1 THEN specific_user_price_cents END
            FROM prewarm_mailboxes
            WHERE email = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(emails)
        .fetch_all(&self.pool)
        .await?;

        if !overrides.is_empty() && overrides.iter().all(|o| o.is_some()) {
            let max = overrides.iter().flatten().max().copied();
            if let Some(price) = max {
                return Ok(price);
            }
        }

        Ok(pricing::wallet_tier_price_cents(emails.len() as i64))
    }

    /// Buy specific pool mailboxes with wallet funds.
    ///
    /// Debit covers the full selection; rows lost to a concurrent buyer are
    /// refunded and the subscription is sized to what was actually claimed.
    pub async fn purchase_with_wallet(
        &self,
        user_id: Uuid,
        emails: &[String],
    ) -> BillingResult<PrewarmPurchaseOutcome> {
        if emails.is_empty() {
            return Err(BillingError::Validation("no mailboxes selected".to_string()));
        }

        let unit_price = self.wallet_unit_price_cents(user_id, emails).await?;
        let total = unit_price * emails.len() as i64;
        let subscription_id = Uuid::new_v4();

        self.wallet
            .debit(
                user_id,
                total,
                &format!("{} pre-warmed mailboxes", emails.len()),
                Some(subscription_id),
            )
            .await?;

        let subscription = self
            .create_subscription(subscription_id, user_id, None, unit_price)
            .await?;

        let claimed = self
            .claim_for_subscription(user_id, subscription.id, emails)
            .await?;
        let unavailable: Vec<String> = emails
            .iter()
            .filter(|e| !claimed.contains(e))
            .cloned()
            .collect();

        if claimed.is_empty() {
            // Nothing left to sell; undo the whole purchase.
            self.wallet
                .credit(user_id, total, "refund: pre-warmed mailboxes no longer available", Some(subscription_id))
                .await?;
            sqlx::query("DELETE FROM subscriptions WHERE id = $1")
                .bind(subscription.id)
                .execute(&self.pool)
                .await?;
            return Err(BillingError::NoCapacity);
        }

        let refund = unit_price * unavailable.len() as i64;
        if refund > 0 {
            if let Err(e) = self
                .wallet
                .credit(user_id, refund, "refund: pre-warmed mailboxes no longer available", Some(subscription_id))
                .await
            {
                tracing::error!(user_id = %user_id, error = %e, "Failed to refund unclaimed pre-warm mailboxes");
            }
        }

        let charged = total - refund;
        let subscription = self
            .finalize_subscription(subscription.id, claimed.len() as i32)
            .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::PrewarmPurchase,
            charged,
            PaymentMethod::Wallet,
            Some(subscription.id),
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            claimed = claimed.len(),
            unavailable = unavailable.len(),
            charged_cents = charged,
            "Pre-warmed mailbox purchase complete"
        );

        Ok(PrewarmPurchaseOutcome {
            subscription,
            claimed,
            unavailable,
            charged_cents: charged,
        })
    }

    /// Webhook path: a Stripe-paid pre-warm purchase claims its mailboxes
    /// against an already-created subscription row.
    pub async fn claim_for_subscription(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        emails: &[String],
    ) -> BillingResult<Vec<String>> {
        let mut claimed = Vec::with_capacity(emails.len());

        for email in emails {
            let result = sqlx::query(
                r#"
                UPDATE prewarm_mailboxes
                SET user_id = $1, subscription_id = $2, status = 'active'
                WHERE email = $3
                  AND status = 'ready_for_sale'
                  AND (specific_user_id IS NULL OR specific_user_id = $1)
                "#,
            )
            .bind(user_id)
            .bind(subscription_id)
            .bind(email)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                claimed.push(email.clone());
            } else {
                tracing::warn!(
                    user_id = %user_id,
                    email = %email,
                    "Pre-warmed mailbox no longer available"
                );
            }
        }

        Ok(claimed)
    }

    /// Size a subscription to the claimed count. Claimed mailboxes are in
    /// use by definition, so used equals total here.
    pub async fn finalize_subscription(
        &self,
        subscription_id: Uuid,
        claimed: i32,
    ) -> BillingResult<Subscription> {
        let subscription: Subscription = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET number_of_mailboxes = $1,
                number_of_used_mailboxes = $1,
                updated_at = NOW()
            WHERE id = $2
            RETURNING id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id,
                      payment_method, status, number_of_mailboxes, number_of_used_mailboxes,
                      price_cents, renews_on, created_at, updated_at
            "#,
        )
        .bind(claimed)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    pub async fn create_subscription(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        stripe_subscription_id: Option<&str>,
        unit_price_cents: i64,
    ) -> BillingResult<Subscription> {
        let payment_method = if stripe_subscription_id.is_some() {
            PaymentMethod::Stripe
        } else {
            PaymentMethod::Wallet
        };
        let renews_on = add_one_month(OffsetDateTime::now_utc());

        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id,
                 payment_method, status, number_of_mailboxes, number_of_used_mailboxes,
                 price_cents, renews_on, created_at, updated_at)
            VALUES ($1, $2, 'addon', $3, NULL, $4, $5, 'active', 0, 0, $6, $7, NOW(), NOW())
            RETURNING id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id,
                      payment_method, status, number_of_mailboxes, number_of_used_mailboxes,
                      price_cents, renews_on, created_at, updated_at
            "#,
        )
        .bind(subscription_id)
        .bind(user_id)
        .bind(MailboxType::Prewarmed.as_str())
        .bind(stripe_subscription_id)
        .bind(payment_method.as_str())
        .bind(unit_price_cents)
        .bind(renews_on)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }
}
