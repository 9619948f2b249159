//! Price resolution for additional mailboxes and pre-warmed inventory.

use mailstack_shared::MailboxType;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Applied when a user has no plan and no plan in the catalog carries a
/// per-additional-mailbox rate. Higher than any catalog rate.
pub const FALLBACK_ADDON_PRICE_CENTS: i64 = 500;

/// Minimum wallet top-up accepted at checkout.
pub const MIN_TOPUP_CENTS: i64 = 500;

/// Where an addon unit price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    /// Negotiated rate from the pricing-exceptions table.
    UserOverride,
    /// The user's own plan defines a per-additional-mailbox rate.
    PlanRate,
    /// No plan rate; cheapest active catalog plan's rate used.
    CheapestPlan,
    /// Nothing configured anywhere; hardcoded fallback.
    Fallback,
}

/// Product key a mailbox type resolves prices under in `pricing_exceptions`.
pub fn product_key(mailbox_type: MailboxType) -> &'static str {
    match mailbox_type {
        MailboxType::Gsuite => "gsuite",
        MailboxType::Prewarmed => "prewarm",
    }
}

/// Volume pricing for wallet-paid mailboxes, cents per mailbox per month.
/// Thresholds are inclusive.
pub fn wallet_tier_price_cents(quantity: i64) -> i64 {
    match quantity {
        q if q >= 1000 => 200,
        q if q >= 500 => 225,
        q if q >= 100 => 250,
        q if q >= 20 => 275,
        _ => 300,
    }
}

/// Wallet unit price: a negotiated per-user rate beats the volume tiers.
pub fn resolve_wallet_unit_price(user_override: Option<i64>, quantity: i64) -> i64 {
    user_override.unwrap_or_else(|| wallet_tier_price_cents(quantity))
}

/// Addon unit price chain: user override, then the user's plan rate, then
/// the cheapest catalog rate, then the hardcoded fallback.
pub fn resolve_addon_price(
    user_override: Option<i64>,
    plan_rate: Option<i64>,
    cheapest_plan_rate: Option<i64>,
) -> (i64, PriceSource) {
    if let Some(rate) = user_override {
        return (rate, PriceSource::UserOverride);
    }
    if let Some(rate) = plan_rate {
        return (rate, PriceSource::PlanRate);
    }
    match cheapest_plan_rate {
        Some(rate) => (rate, PriceSource::CheapestPlan),
        None => (FALLBACK_ADDON_PRICE_CENTS, PriceSource::Fallback),
    }
}

/// Negotiated per-user rate for a product, if one exists.
pub async fn user_override_price_cents(
    pool: &PgPool,
    user_id: Uuid,
    mailbox_type: MailboxType,
) -> BillingResult<Option<i64>> {
    let price: Option<i64> = sqlx::query_scalar(
        "SELECT price_cents FROM pricing_exceptions WHERE user_id = $1 AND product = $2",
    )
    .bind(user_id)
    .bind(product_key(mailbox_type))
    .fetch_optional(pool)
    .await?;
    Ok(price)
}

/// Resolve the per-mailbox price for a Stripe-paid addon purchase.
///
/// See [`resolve_addon_price`] for the resolution order.
pub async fn addon_unit_price_cents(
    pool: &PgPool,
    user_id: Uuid,
    mailbox_type: MailboxType,
) -> BillingResult<(i64, PriceSource)> {
    let user_override = user_override_price_cents(pool, user_id, mailbox_type).await?;
    if let Some(rate) = user_override {
        return Ok((rate, PriceSource::UserOverride));
    }

    let plan_rate: Option<Option<i64>> = sqlx::query_scalar(
        r#"
        SELECT p.price_per_additional_mailbox_cents
        FROM subscriptions s
        JOIN plans p ON p.id = s.plan_id
        WHERE s.user_id = $1
          AND s.kind = 'plan'
          AND s.status IN ('active', 'cancel_at_period_end')
          AND s.mailbox_type = $2
        ORDER BY s.created_at ASC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(mailbox_type.as_str())
    .fetch_optional(pool)
    .await?;

    let cheapest: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT price_per_additional_mailbox_cents
        FROM plans
        WHERE active
          AND mailbox_type = $1
          AND price_per_additional_mailbox_cents IS NOT NULL
        ORDER BY price_cents ASC
        LIMIT 1
        "#,
    )
    .bind(mailbox_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(resolve_addon_price(None, plan_rate.flatten(), cheapest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_tiers_step_down_at_volume_thresholds() {
        assert_eq!(wallet_tier_price_cents(1), 300);
        assert_eq!(wallet_tier_price_cents(19), 300);
        assert_eq!(wallet_tier_price_cents(20), 275);
        assert_eq!(wallet_tier_price_cents(99), 275);
        assert_eq!(wallet_tier_price_cents(100), 250);
        assert_eq!(wallet_tier_price_cents(499), 250);
        assert_eq!(wallet_tier_price_cents(500), 225);
        assert_eq!(wallet_tier_price_cents(999), 225);
        assert_eq!(wallet_tier_price_cents(1000), 200);
        assert_eq!(wallet_tier_price_cents(5000), 200);
    }

    #[test]
    fn user_override_beats_every_volume_tier() {
        assert_eq!(resolve_wallet_unit_price(Some(250), 10), 250);
        assert_eq!(resolve_wallet_unit_price(Some(250), 1000), 250);
        assert_eq!(resolve_wallet_unit_price(None, 10), 300);
    }

    #[test]
    fn addon_price_resolution_order() {
        assert_eq!(
            resolve_addon_price(Some(199), Some(350), Some(275)),
            (199, PriceSource::UserOverride)
        );
        assert_eq!(
            resolve_addon_price(None, Some(350), Some(275)),
            (350, PriceSource::PlanRate)
        );
        assert_eq!(
            resolve_addon_price(None, None, Some(275)),
            (275, PriceSource::CheapestPlan)
        );
        assert_eq!(
            resolve_addon_price(None, None, None),
            (FALLBACK_ADDON_PRICE_CENTS, PriceSource::Fallback)
        );
    }

    #[test]
    fn product_keys_match_exception_table_values() {
        assert_eq!(product_key(MailboxType::Gsuite), "gsuite");
        assert_eq!(product_key(MailboxType::Prewarmed), "prewarm");
    }
}
