//! Subscription lifecycle.
//!
//! One `subscriptions` table carries both base plans (`kind = 'plan'`) and
//! add-on mailbox packs (`kind = 'addon'`). A row tracks its payment rail
//! (`stripe` or `wallet`), its capacity counters and its renewal date.
//! Stripe-paid rows renew through `invoice.payment_succeeded` webhooks;
//! wallet-paid rows renew through the worker sweep in
//! [`SubscriptionService::renew_due_wallet_subscriptions`].

use std::str::FromStr;

use mailstack_shared::{
    JobKind, MailboxType, OrderType, PaymentMethod, SubscriptionStatus,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{CancelSubscription, SubscriptionId, UpdateSubscription, UpdateSubscriptionItems};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::jobs;
use crate::orders;
use crate::pricing;
use crate::wallet::WalletEngine;

/// Catalog plan.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub interval: String,
    pub mailbox_limit: i32,
    pub price_per_additional_mailbox_cents: Option<i64>,
    pub stripe_price_id: String,
    pub mailbox_type: String,
    pub active: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub mailbox_type: String,
    pub plan_id: Option<Uuid>,
    pub stripe_subscription_id: Option<String>,
    pub payment_method: String,
    pub status: String,
    pub number_of_mailboxes: i32,
    pub number_of_used_mailboxes: i32,
    pub price_cents: i64,
    pub renews_on: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, kind, mailbox_type, plan_id, \
     stripe_subscription_id, payment_method, status, number_of_mailboxes, \
     number_of_used_mailboxes, price_cents, renews_on, created_at, updated_at";

impl Subscription {
    pub fn payment_method(&self) -> BillingResult<PaymentMethod> {
        PaymentMethod::from_str(&self.payment_method)
            .map_err(|e| BillingError::Internal(e.to_string()))
    }

    pub fn mailbox_type(&self) -> BillingResult<MailboxType> {
        MailboxType::from_str(&self.mailbox_type)
            .map_err(|e| BillingError::Internal(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    Immediate,
    AtPeriodEnd,
}

/// Resolved effect of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CancelPlan {
    /// Stripe must be told; wallet rows have nothing remote to cancel.
    pub(crate) remote_call: bool,
    pub(crate) new_status: SubscriptionStatus,
    /// Provisioned mailboxes tear down now rather than at period end.
    pub(crate) cascade_now: bool,
}

pub(crate) fn plan_cancel(method: PaymentMethod, mode: CancelMode) -> CancelPlan {
    CancelPlan {
        remote_call: method == PaymentMethod::Stripe,
        new_status: match mode {
            CancelMode::Immediate => SubscriptionStatus::Cancelled,
            CancelMode::AtPeriodEnd => SubscriptionStatus::CancelAtPeriodEnd,
        },
        cascade_now: mode == CancelMode::Immediate,
    }
}

#[derive(Debug, Serialize)]
pub struct PlanChangeOutcome {
    pub subscription: Subscription,
    pub previous_plan_id: Uuid,
    pub new_plan_id: Uuid,
    /// True when the provider was told to create prorations (upgrade path).
    pub prorated: bool,
}

/// Outcome of one wallet renewal sweep, for worker logging.
#[derive(Debug, Default)]
pub struct RenewalSweepSummary {
    pub renewed: usize,
    pub cancelled_for_balance: usize,
    pub term_ended: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct SubscriptionService {
    client: stripe::Client,
    pool: PgPool,
    wallet: WalletEngine,
}

impl SubscriptionService {
    pub fn new(client: stripe::Client, pool: PgPool) -> Self {
        let wallet = WalletEngine::new(pool.clone());
        Self {
            client,
            pool,
            wallet,
        }
    }

    pub async fn list(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<Subscription> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find(&self, user_id: Uuid, subscription_id: Uuid) -> BillingResult<Subscription> {
        let row: Option<Subscription> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND user_id = $2"
        ))
        .bind(subscription_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| BillingError::NotFound(format!("subscription {subscription_id}")))
    }

    pub async fn find_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<Subscription> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, name, price_cents, currency, interval, mailbox_limit,
                   price_per_additional_mailbox_cents, stripe_price_id, mailbox_type, active
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan {plan_id}")))
    }

    pub async fn list_active_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans: Vec<Plan> = sqlx::query_as(
            r#"
            SELECT id, name, price_cents, currency, interval, mailbox_limit,
                   price_per_additional_mailbox_cents, stripe_price_id, mailbox_type, active
            FROM plans
            WHERE active
            ORDER BY price_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    /// Buy an add-on mailbox pack with wallet funds.
    ///
    /// Debit before grant: a failed debit leaves no subscription, no order
    /// and no ledger entry behind.
    pub async fn purchase_mailboxes_with_wallet(
        &self,
        user_id: Uuid,
        mailbox_type: MailboxType,
        quantity: i32,
    ) -> BillingResult<Subscription> {
        if quantity <= 0 {
            return Err(BillingError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let user_override =
            pricing::user_override_price_cents(&self.pool, user_id, mailbox_type).await?;
        let unit_price = pricing::resolve_wallet_unit_price(user_override, quantity as i64);
        let total = unit_price * quantity as i64;
        let subscription_id = Uuid::new_v4();

        self.wallet
            .debit(
                user_id,
                total,
                &format!("{quantity} {mailbox_type} mailboxes"),
                Some(subscription_id),
            )
            .await?;

        let renews_on = add_one_month(OffsetDateTime::now_utc());

        let subscription: Subscription = sqlx::query_as(&format!(
            "INSERT INTO subscriptions \
                (id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id, \
                 payment_method, status, number_of_mailboxes, number_of_used_mailboxes, \
                 price_cents, renews_on, created_at, updated_at) \
             VALUES ($1, $2, 'addon', $3, NULL, NULL, 'wallet', 'active', $4, 0, $5, $6, NOW(), NOW()) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(subscription_id)
        .bind(user_id)
        .bind(mailbox_type.as_str())
        .bind(quantity)
        .bind(unit_price)
        .bind(renews_on)
        .fetch_one(&self.pool)
        .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::MailboxPurchase,
            total,
            PaymentMethod::Wallet,
            Some(subscription_id),
        )
        .await?;

        // History is a convenience journal; its failure never voids a paid
        // purchase.
        if let Err(e) = self
            .record_completed_history(user_id, "mailbox_purchase", total)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to write purchase history");
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            quantity = quantity,
            total_cents = total,
            "Wallet mailbox purchase complete"
        );

        Ok(subscription)
    }

    /// Apply a confirmed plan purchase. Called from the checkout-completed
    /// webhook, never from the request path.
    pub async fn apply_plan_subscription(
        &self,
        user_id: Uuid,
        plan: &Plan,
        stripe_subscription_id: &str,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<Subscription> {
        let renews_on = period_end.unwrap_or_else(|| add_one_month(OffsetDateTime::now_utc()));

        // Upsert on the provider id so a replayed webhook refreshes the row
        // instead of duplicating it.
        let subscription: Subscription = sqlx::query_as(&format!(
            "INSERT INTO subscriptions \
                (id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id, \
                 payment_method, status, number_of_mailboxes, number_of_used_mailboxes, \
                 price_cents, renews_on, created_at, updated_at) \
             VALUES ($1, $2, 'plan', $3, $4, $5, 'stripe', 'active', $6, 0, $7, $8, NOW(), NOW()) \
             ON CONFLICT (stripe_subscription_id) DO UPDATE \
                SET status = 'active', \
                    plan_id = EXCLUDED.plan_id, \
                    number_of_mailboxes = EXCLUDED.number_of_mailboxes, \
                    price_cents = EXCLUDED.price_cents, \
                    renews_on = EXCLUDED.renews_on, \
                    updated_at = NOW() \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&plan.mailbox_type)
        .bind(plan.id)
        .bind(stripe_subscription_id)
        .bind(plan.mailbox_limit)
        .bind(plan.price_cents)
        .bind(renews_on)
        .fetch_one(&self.pool)
        .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::PlanPurchase,
            plan.price_cents,
            PaymentMethod::Stripe,
            Some(subscription.id),
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan = %plan.name,
            "Plan subscription applied"
        );

        Ok(subscription)
    }

    /// Grant a Stripe-paid add-on pack after payment confirmation.
    pub async fn grant_addon(
        &self,
        user_id: Uuid,
        mailbox_type: MailboxType,
        quantity: i32,
        unit_price_cents: i64,
        stripe_subscription_id: Option<&str>,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<Subscription> {
        if quantity <= 0 {
            return Err(BillingError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let renews_on = period_end.unwrap_or_else(|| add_one_month(OffsetDateTime::now_utc()));

        let subscription: Subscription = sqlx::query_as(&format!(
            "INSERT INTO subscriptions \
                (id, user_id, kind, mailbox_type, plan_id, stripe_subscription_id, \
                 payment_method, status, number_of_mailboxes, number_of_used_mailboxes, \
                 price_cents, renews_on, created_at, updated_at) \
             VALUES ($1, $2, 'addon', $3, NULL, $4, 'stripe', 'active', $5, 0, $6, $7, NOW(), NOW()) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(mailbox_type.as_str())
        .bind(stripe_subscription_id)
        .bind(quantity)
        .bind(unit_price_cents)
        .bind(renews_on)
        .fetch_one(&self.pool)
        .await?;

        orders::record(
            &self.pool,
            user_id,
            OrderType::MailboxPurchase,
            unit_price_cents * quantity as i64,
            PaymentMethod::Stripe,
            Some(subscription.id),
        )
        .await?;

        Ok(subscription)
    }

    /// Cancel a subscription.
    ///
    /// Four paths: the payment rail decides who owns the renewal clock and
    /// the mode decides when access ends.
    pub async fn cancel(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        mode: CancelMode,
    ) -> BillingResult<Subscription> {
        let subscription = self.find(user_id, subscription_id).await?;

        let status = SubscriptionStatus::from_str(&subscription.status)
            .map_err(|e| BillingError::Internal(e.to_string()))?;
        if !status.counts_toward_quota() {
            return Err(BillingError::Validation(
                "subscription is not active".to_string(),
            ));
        }

        let plan = plan_cancel(subscription.payment_method()?, mode);

        if plan.remote_call {
            if let Some(stripe_id) = &subscription.stripe_subscription_id {
                let id = SubscriptionId::from_str(stripe_id)?;
                match mode {
                    CancelMode::Immediate => {
                        stripe::Subscription::cancel(
                            &self.client,
                            &id,
                            CancelSubscription::default(),
                        )
                        .await?;
                    }
                    CancelMode::AtPeriodEnd => {
                        stripe::Subscription::update(
                            &self.client,
                            &id,
                            UpdateSubscription {
                                cancel_at_period_end: Some(true),
                                ..Default::default()
                            },
                        )
                        .await?;
                    }
                }
            }
        }

        self.set_status(subscription.id, plan.new_status).await?;
        if plan.cascade_now {
            self.cancel_cascade(&subscription).await?;
        }
        // Deferred teardown: the wallet sweep finishes at renews_on, the
        // Stripe path when customer.subscription.deleted arrives.

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            immediate = matches!(mode, CancelMode::Immediate),
            payment_method = %subscription.payment_method,
            "Subscription cancelled"
        );

        self.find(user_id, subscription_id).await
    }

    /// Tear down what a cancelled subscription provisioned.
    ///
    /// Gsuite mailboxes go inactive but are never deleted; pre-warmed
    /// mailboxes return to the pool. A fulfilment job is written even when
    /// nothing matched, so downstream always sees the cancellation.
    pub async fn cancel_cascade(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        match subscription.mailbox_type()? {
            MailboxType::Gsuite => {
                let deactivated = sqlx::query(
                    r#"
                    UPDATE mailboxes
                    SET status = 'inactive'
                    WHERE subscription_id = $1 AND status = 'active'
                    "#,
                )
                .bind(subscription.id)
                .execute(&mut *tx)
                .await?;

                jobs::enqueue(
                    &mut tx,
                    subscription.user_id,
                    JobKind::DeactivateMailboxes,
                    serde_json::json!({
                        "subscription_id": subscription.id,
                        "deactivated": deactivated.rows_affected(),
                    }),
                )
                .await?;
            }
            MailboxType::Prewarmed => {
                let released = sqlx::query(
                    r#"
                    UPDATE prewarm_mailboxes
                    SET status = 'inactive',
                        user_id = NULL,
                        subscription_id = NULL,
                        export_id = NULL
                    WHERE subscription_id = $1
                    "#,
                )
                .bind(subscription.id)
                .execute(&mut *tx)
                .await?;

                jobs::enqueue(
                    &mut tx,
                    subscription.user_id,
                    JobKind::ReleasePrewarm,
                    serde_json::json!({
                        "subscription_id": subscription.id,
                        "released": released.rows_affected(),
                    }),
                )
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            mailbox_type = %subscription.mailbox_type,
            "Cancel cascade complete"
        );

        Ok(())
    }

    /// Renew every due wallet-paid subscription. Rows already flagged
    /// cancel_at_period_end have reached the end of their term and are
    /// cancelled instead of renewed.
    pub async fn renew_due_wallet_subscriptions(&self) -> RenewalSweepSummary {
        let due: Vec<Subscription> = match sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE payment_method = 'wallet' \
               AND status IN ('active', 'cancel_at_period_end') \
               AND renews_on IS NOT NULL \
               AND renews_on <= NOW() \
             ORDER BY renews_on ASC"
        ))
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load due wallet subscriptions");
                return RenewalSweepSummary::default();
            }
        };

        let mut summary = RenewalSweepSummary::default();

        for subscription in due {
            if subscription.status == SubscriptionStatus::CancelAtPeriodEnd.as_str() {
                match self.finish_period_end_cancel(&subscription).await {
                    Ok(()) => summary.term_ended += 1,
                    Err(e) => {
                        summary.errors += 1;
                        tracing::error!(
                            subscription_id = %subscription.id,
                            error = %e,
                            "Failed to finish period-end cancellation"
                        );
                    }
                }
                continue;
            }

            match self.renew_wallet_subscription(&subscription).await {
                Ok(true) => summary.renewed += 1,
                Ok(false) => summary.cancelled_for_balance += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Wallet renewal failed"
                    );
                }
            }
        }

        summary
    }

    /// Returns true on successful renewal, false when the wallet could not
    /// cover it and the subscription was cancelled.
    pub async fn renew_wallet_subscription(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<bool> {
        let total = subscription.price_cents * subscription.number_of_mailboxes as i64;

        let debit = self
            .wallet
            .debit(
                subscription.user_id,
                total,
                &format!(
                    "renewal of {} {} mailboxes",
                    subscription.number_of_mailboxes, subscription.mailbox_type
                ),
                Some(subscription.id),
            )
            .await;

        match debit {
            Ok(_) => {
                let base = subscription
                    .renews_on
                    .unwrap_or_else(OffsetDateTime::now_utc);
                sqlx::query(
                    "UPDATE subscriptions SET renews_on = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(add_one_month(base))
                .bind(subscription.id)
                .execute(&self.pool)
                .await?;

                orders::record(
                    &self.pool,
                    subscription.user_id,
                    OrderType::Renewal,
                    total,
                    PaymentMethod::Wallet,
                    Some(subscription.id),
                )
                .await?;

                tracing::info!(
                    subscription_id = %subscription.id,
                    total_cents = total,
                    "Wallet subscription renewed"
                );
                Ok(true)
            }
            Err(BillingError::InsufficientBalance {
                required_cents,
                available_cents,
            }) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    user_id = %subscription.user_id,
                    required_cents = required_cents,
                    available_cents = available_cents,
                    "Insufficient balance at renewal, cancelling subscription"
                );
                self.mark_cancelled(subscription.id).await?;
                self.cancel_cascade(subscription).await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn finish_period_end_cancel(&self, subscription: &Subscription) -> BillingResult<()> {
        self.mark_cancelled(subscription.id).await?;
        self.cancel_cascade(subscription).await
    }

    /// Swap the user's base plan.
    ///
    /// Upgrades (new price at or above current) prorate immediately;
    /// downgrades take effect without prorations and settle at renewal.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        new_plan_id: Uuid,
    ) -> BillingResult<PlanChangeOutcome> {
        let current: Option<Subscription> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 \
               AND kind = 'plan' \
               AND status IN ('active', 'cancel_at_period_end') \
             ORDER BY created_at ASC \
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let current =
            current.ok_or_else(|| BillingError::NoActiveSubscription("plan".to_string()))?;

        let current_plan_id = current.plan_id.ok_or_else(|| {
            BillingError::Internal("plan subscription without plan_id".to_string())
        })?;
        let current_plan = self.get_plan(current_plan_id).await?;
        let new_plan = self.get_plan(new_plan_id).await?;

        if !new_plan.active {
            return Err(BillingError::Validation(format!(
                "plan {} is not available",
                new_plan.name
            )));
        }

        // Same plan by either identity is a no-op request, rejected.
        if new_plan.id == current_plan.id
            || new_plan.stripe_price_id == current_plan.stripe_price_id
        {
            return Err(BillingError::Validation(
                "already subscribed to this plan".to_string(),
            ));
        }

        let is_upgrade = new_plan.price_cents >= current_plan.price_cents;

        if let Some(stripe_id) = &current.stripe_subscription_id {
            let id = SubscriptionId::from_str(stripe_id)?;
            let remote = stripe::Subscription::retrieve(&self.client, &id, &[]).await?;
            let item_id = remote
                .items
                .data
                .first()
                .map(|item| item.id.to_string())
                .ok_or_else(|| {
                    BillingError::Stripe("subscription has no items to update".to_string())
                })?;

            stripe::Subscription::update(
                &self.client,
                &id,
                UpdateSubscription {
                    items: Some(vec![UpdateSubscriptionItems {
                        id: Some(item_id),
                        price: Some(new_plan.stripe_price_id.clone()),
                        ..Default::default()
                    }]),
                    proration_behavior: Some(if is_upgrade {
                        SubscriptionProrationBehavior::CreateProrations
                    } else {
                        SubscriptionProrationBehavior::None
                    }),
                    ..Default::default()
                },
            )
            .await?;
        }

        let subscription: Subscription = sqlx::query_as(&format!(
            "UPDATE subscriptions \
             SET plan_id = $1, \
                 number_of_mailboxes = $2, \
                 price_cents = $3, \
                 updated_at = NOW() \
             WHERE id = $4 \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(new_plan.id)
        .bind(new_plan.mailbox_limit)
        .bind(new_plan.price_cents)
        .bind(current.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            from_plan = %current_plan.name,
            to_plan = %new_plan.name,
            prorated = is_upgrade,
            "Plan changed"
        );

        Ok(PlanChangeOutcome {
            subscription,
            previous_plan_id: current_plan.id,
            new_plan_id: new_plan.id,
            prorated: is_upgrade,
        })
    }

    /// Webhook hook: a paid invoice re-asserts active status and moves the
    /// renewal date forward.
    pub async fn mark_renewed(
        &self,
        subscription_id: Uuid,
        renews_on: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', renews_on = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(renews_on)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE subscriptions SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, subscription_id: Uuid) -> BillingResult<()> {
        self.set_status(subscription_id, SubscriptionStatus::Cancelled)
            .await
    }

    async fn record_completed_history(
        &self,
        user_id: Uuid,
        purchase_type: &str,
        amount_cents: i64,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_history
                (id, user_id, stripe_session_id, purchase_type, amount_cents, metadata, status, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $4, '{}'::jsonb, 'completed', NOW(), NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(purchase_type)
        .bind(amount_cents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn wallet(&self) -> &WalletEngine {
        &self.wallet
    }

    pub fn client(&self) -> &stripe::Client {
        &self.client
    }
}

/// Calendar-month step used by wallet renewal terms. Day of month is
/// clamped so Jan 31 renews on Feb 28/29.
pub fn add_one_month(base: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match base.month() as u8 {
        12 => (base.year() + 1, time::Month::January),
        m => (
            base.year(),
            // m is 1..=11 here
            time::Month::try_from(m + 1).unwrap_or(time::Month::December),
        ),
    };

    let max_day = time::util::days_in_year_month(year, month);
    let day = base.day().min(max_day);

    match time::Date::from_calendar_date(year, month, day) {
        Ok(date) => base.replace_date(date),
        Err(_) => base + time::Duration::days(30),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    #[test]
    fn add_one_month_steps_within_year() {
        let base = datetime!(2026-03-15 12:00 UTC);
        assert_eq!(add_one_month(base), datetime!(2026-04-15 12:00 UTC));
    }

    #[test]
    fn add_one_month_wraps_december() {
        let base = datetime!(2026-12-02 00:00 UTC);
        assert_eq!(add_one_month(base), datetime!(2027-01-02 00:00 UTC));
    }

    #[test]
    fn add_one_month_clamps_short_months() {
        let base = datetime!(2026-01-31 08:30 UTC);
        assert_eq!(add_one_month(base), datetime!(2026-02-28 08:30 UTC));

        let leap = datetime!(2028-01-31 08:30 UTC);
        assert_eq!(add_one_month(leap), datetime!(2028-02-29 08:30 UTC));
    }
}
