//! Billing Invariants Module
//!
//! Provides runnable consistency checks for the billing system.
//! These invariants can be run after any mutation or webhook replay to ensure
//! the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers all critical billing consistency requirements

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - system may be charging incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for overcommitted subscription violation
#[derive(Debug, sqlx::FromRow)]
struct OvercommittedRow {
    sub_id: Uuid,
    user_id: Uuid,
    number_of_mailboxes: i32,
    number_of_used_mailboxes: i32,
}

/// Row type for negative wallet balance violation
#[derive(Debug, sqlx::FromRow)]
struct NegativeWalletRow {
    user_id: Uuid,
    balance_cents: i64,
}

/// Row type for domain counter drift violation
#[derive(Debug, sqlx::FromRow)]
struct DomainDriftRow {
    domain_id: Uuid,
    user_id: Uuid,
    name: String,
    mailbox_count: i32,
    live_count: i64,
}

/// Row type for orphaned active mailboxes violation
#[derive(Debug, sqlx::FromRow)]
struct OrphanedMailboxRow {
    mailbox_id: Uuid,
    user_id: Uuid,
    email: String,
    subscription_status: String,
}

/// Row type for stale pending checkout violation
#[derive(Debug, sqlx::FromRow)]
struct StalePendingRow {
    history_id: Uuid,
    user_id: Uuid,
    purchase_type: String,
    created_at: OffsetDateTime,
}

/// Row type for unowned active pool mailbox violation
#[derive(Debug, sqlx::FromRow)]
struct UnownedPrewarmRow {
    prewarm_id: Uuid,
    email: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_quota_not_overcommitted().await?);
        violations.extend(self.check_wallet_non_negative().await?);
        violations.extend(self.check_domain_counter_drift().await?);
        violations.extend(self.check_no_orphaned_active_mailboxes().await?);
        violations.extend(self.check_no_stale_pending_checkouts().await?);
        violations.extend(self.check_pool_ownership().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Used slots never exceed paid slots, and neither counter
    /// is negative.
    ///
    /// An overcommitted subscription means slots were granted past paid
    /// capacity, which is revenue loss.
    async fn check_quota_not_overcommitted(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OvercommittedRow> = sqlx::query_as(
            r#"
            SELECT id as sub_id, user_id, number_of_mailboxes, number_of_used_mailboxes
            FROM subscriptions
            WHERE number_of_used_mailboxes > number_of_mailboxes
               OR number_of_used_mailboxes < 0
               OR number_of_mailboxes < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "quota_not_overcommitted".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Subscription has {} used of {} paid mailbox slots",
                    row.number_of_used_mailboxes, row.number_of_mailboxes
                ),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "number_of_mailboxes": row.number_of_mailboxes,
                    "number_of_used_mailboxes": row.number_of_used_mailboxes,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Wallet balances are never negative.
    ///
    /// The conditional debit statement should make this impossible; a hit
    /// here means funds moved outside the wallet engine.
    async fn check_wallet_non_negative(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeWalletRow> = sqlx::query_as(
            "SELECT user_id, balance_cents FROM wallets WHERE balance_cents < 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "wallet_non_negative".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Wallet balance is {} cents (negative)",
                    row.balance_cents
                ),
                context: serde_json::json!({
                    "balance_cents": row.balance_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: The cached domain mailbox counter matches the live
    /// mailbox rows on that domain.
    async fn check_domain_counter_drift(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DomainDriftRow> = sqlx::query_as(
            r#"
            SELECT
                d.id as domain_id,
                d.user_id,
                d.name,
                d.mailbox_count,
                COUNT(m.id) FILTER (WHERE m.status <> 'scheduled_for_deletion') as live_count
            FROM domains d
            LEFT JOIN mailboxes m ON m.domain_id = d.id
            GROUP BY d.id, d.user_id, d.name, d.mailbox_count
            HAVING d.mailbox_count <> COUNT(m.id) FILTER (WHERE m.status <> 'scheduled_for_deletion')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "domain_counter_drift".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Domain '{}' counter says {} mailboxes but {} exist",
                    row.name, row.mailbox_count, row.live_count
                ),
                context: serde_json::json!({
                    "domain_id": row.domain_id,
                    "mailbox_count": row.mailbox_count,
                    "live_count": row.live_count,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 4: No active mailbox hangs off a cancelled or inactive
    /// subscription. The cancel cascade should have deactivated them.
    async fn check_no_orphaned_active_mailboxes(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanedMailboxRow> = sqlx::query_as(
            r#"
            SELECT
                m.id as mailbox_id,
                m.user_id,
                m.email,
                s.status as subscription_status
            FROM mailboxes m
            JOIN subscriptions s ON s.id = m.subscription_id
            WHERE m.status = 'active'
              AND s.status IN ('cancelled', 'inactive')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_orphaned_active_mailboxes".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Mailbox '{}' is active on a {} subscription",
                    row.email, row.subscription_status
                ),
                context: serde_json::json!({
                    "mailbox_id": row.mailbox_id,
                    "subscription_status": row.subscription_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Pending checkout journal rows older than 48 hours.
    ///
    /// Stripe expires hosted sessions after 24 hours, so a pending row this
    /// old means the `checkout.session.expired` webhook was missed.
    async fn check_no_stale_pending_checkouts(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StalePendingRow> = sqlx::query_as(
            r#"
            SELECT id as history_id, user_id, purchase_type, created_at
            FROM transaction_history
            WHERE status = 'pending'
              AND created_at < NOW() - INTERVAL '48 hours'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stale_pending_checkouts".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Checkout for '{}' still pending since {}",
                    row.purchase_type, row.created_at
                ),
                context: serde_json::json!({
                    "history_id": row.history_id,
                    "created_at": row.created_at,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Invariant 6: Active pool mailboxes have an owner and a subscription;
    /// mailboxes on sale have neither.
    async fn check_pool_ownership(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnownedPrewarmRow> = sqlx::query_as(
            r#"
            SELECT id as prewarm_id, email
            FROM prewarm_mailboxes
            WHERE (status = 'active' AND (user_id IS NULL OR subscription_id IS NULL))
               OR (status = 'ready_for_sale' AND (user_id IS NOT NULL OR subscription_id IS NOT NULL))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pool_ownership".to_string(),
                user_ids: vec![],
                description: format!(
                    "Pool mailbox '{}' has inconsistent ownership for its status",
                    row.email
                ),
                context: serde_json::json!({
                    "prewarm_id": row.prewarm_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "quota_not_overcommitted" => self.check_quota_not_overcommitted().await,
            "wallet_non_negative" => self.check_wallet_non_negative().await,
            "domain_counter_drift" => self.check_domain_counter_drift().await,
            "no_orphaned_active_mailboxes" => self.check_no_orphaned_active_mailboxes().await,
            "no_stale_pending_checkouts" => self.check_no_stale_pending_checkouts().await,
            "pool_ownership" => self.check_pool_ownership().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "quota_not_overcommitted",
            "wallet_non_negative",
            "domain_counter_drift",
            "no_orphaned_active_mailboxes",
            "no_stale_pending_checkouts",
            "pool_ownership",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"quota_not_overcommitted"));
        assert!(checks.contains(&"wallet_non_negative"));
    }
}
