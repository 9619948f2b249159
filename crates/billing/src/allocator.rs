//! Mailbox slot allocator.
//!
//! Paid capacity lives on subscription rows (`number_of_mailboxes` total,
//! `number_of_used_mailboxes` consumed). Assignment picks the oldest
//! subscription with spare capacity and claims a slot with a guarded
//! UPDATE; the guard (`used < total`) makes two concurrent assignments for
//! the last slot race safely, the loser seeing zero rows affected.

use mailstack_shared::{JobKind, MailboxStatus, MailboxType};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::jobs;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Mailbox {
    pub id: Uuid,
    pub user_id: Uuid,
    pub domain_id: Uuid,
    pub subscription_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
    pub mailbox_type: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaSummary {
    pub total: i64,
    pub used: i64,
    pub available: i64,
}

#[derive(Debug, Clone)]
pub struct AssignMailboxRequest {
    pub user_id: Uuid,
    pub domain_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub mailbox_type: MailboxType,
}

#[derive(Debug, FromRow)]
pub(crate) struct CandidateRow {
    pub(crate) id: Uuid,
    pub(crate) number_of_mailboxes: i32,
    pub(crate) number_of_used_mailboxes: i32,
}

#[derive(Clone)]
pub struct Allocator {
    pool: PgPool,
    /// Whether deleting a mailbox hands its slot back to the subscription.
    /// Off by default: a deleted mailbox historically kept its slot until
    /// the subscription renewed or was resized.
    release_on_delete: bool,
}

impl Allocator {
    pub fn new(pool: PgPool, release_on_delete: bool) -> Self {
        Self {
            pool,
            release_on_delete,
        }
    }

    /// Total and consumed capacity for one mailbox type. Subscriptions
    /// cancelling at period end still count; their slots are paid for until
    /// the period ends.
    pub async fn quota(
        &self,
        user_id: Uuid,
        mailbox_type: MailboxType,
    ) -> BillingResult<QuotaSummary> {
        let (total, used): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(number_of_mailboxes), 0)::BIGINT,
                COALESCE(SUM(number_of_used_mailboxes), 0)::BIGINT
            FROM subscriptions
            WHERE user_id = $1
              AND mailbox_type = $2
              AND status IN ('active', 'cancel_at_period_end')
            "#,
        )
        .bind(user_id)
        .bind(mailbox_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(QuotaSummary {
            total,
            used,
            available: (total - used).max(0),
        })
    }

    /// Assign one mailbox against the user's paid capacity.
    ///
    /// The duplicate-address check runs before anything mutates, so a
    /// rejected request never consumes a slot. On a lost claim race the
    /// selection runs once more before giving up with `NoCapacity`.
    pub async fn assign_mailbox(&self, req: AssignMailboxRequest) -> BillingResult<Mailbox> {
        let email = req.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(BillingError::Validation(format!(
                "invalid mailbox address: {email}"
            )));
        }

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM mailboxes
                WHERE lower(email) = $1 AND status <> 'scheduled_for_deletion'
            )
            "#,
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Err(BillingError::MailboxExists(email));
        }

        let domain_owned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM domains WHERE id = $1 AND user_id = $2)",
        )
        .bind(req.domain_id)
        .bind(req.user_id)
        .fetch_one(&self.pool)
        .await?;
        if !domain_owned {
            return Err(BillingError::NotFound(format!(
                "domain {} for user {}",
                req.domain_id, req.user_id
            )));
        }

        // One retry after a lost claim race.
        for attempt in 0..2 {
            match self.try_assign(&req, &email).await {
                Ok(mailbox) => {
                    tracing::info!(
                        user_id = %req.user_id,
                        mailbox_id = %mailbox.id,
                        subscription_id = %mailbox.subscription_id,
                        email = %email,
                        attempt = attempt,
                        "Mailbox assigned"
                    );
                    return Ok(mailbox);
                }
                Err(BillingError::ConcurrentModification) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BillingError::NoCapacity)
    }

    async fn try_assign(
        &self,
        req: &AssignMailboxRequest,
        email: &str,
    ) -> BillingResult<Mailbox> {
        let candidates: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT id, number_of_mailboxes, number_of_used_mailboxes
            FROM subscriptions
            WHERE user_id = $1
              AND mailbox_type = $2
              AND status IN ('active', 'cancel_at_period_end')
              AND number_of_mailboxes > 0
            ORDER BY created_at ASC
            "#,
        )
        .bind(req.user_id)
        .bind(req.mailbox_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        if candidates.is_empty() {
            return Err(BillingError::NoActiveSubscription(
                req.mailbox_type.as_str().to_string(),
            ));
        }

        let target = pick_candidate(&candidates).ok_or(BillingError::NoCapacity)?;

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE subscriptions
            SET number_of_used_mailboxes = number_of_used_mailboxes + 1, updated_at = NOW()
            WHERE id = $1
              AND number_of_used_mailboxes < number_of_mailboxes
            "#,
        )
        .bind(target.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BillingError::ConcurrentModification);
        }

        let mailbox: Mailbox = sqlx::query_as(
            r#"
            INSERT INTO mailboxes
                (id, user_id, domain_id, subscription_id, email, first_name, last_name,
                 status, mailbox_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, NOW())
            RETURNING id, user_id, domain_id, subscription_id, email, first_name, last_name,
                      status, mailbox_type, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.user_id)
        .bind(req.domain_id)
        .bind(target.id)
        .bind(email)
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(req.mailbox_type.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE domains SET mailbox_count = mailbox_count + 1 WHERE id = $1")
            .bind(req.domain_id)
            .execute(&mut *tx)
            .await?;

        jobs::enqueue(
            &mut tx,
            req.user_id,
            JobKind::CreateMailbox,
            serde_json::json!({
                "mailbox_id": mailbox.id,
                "email": email,
                "first_name": req.first_name,
                "last_name": req.last_name,
                "mailbox_type": req.mailbox_type.as_str(),
            }),
        )
        .await?;

        tx.commit().await?;
        Ok(mailbox)
    }

    /// Schedule a mailbox for deletion.
    ///
    /// The domain counter always drops (floored at zero); the subscription
    /// slot is only handed back when the release-on-delete policy is on.
    pub async fn release_mailbox(&self, user_id: Uuid, mailbox_id: Uuid) -> BillingResult<()> {
        let mailbox: Option<Mailbox> = sqlx::query_as(
            r#"
            SELECT id, user_id, domain_id, subscription_id, email, first_name, last_name,
                   status, mailbox_type, created_at
            FROM mailboxes
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(mailbox_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let mailbox = mailbox
            .ok_or_else(|| BillingError::NotFound(format!("mailbox {mailbox_id}")))?;

        if mailbox.status == MailboxStatus::ScheduledForDeletion.as_str() {
            return Err(BillingError::Validation(
                "mailbox is already scheduled for deletion".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE mailboxes SET status = 'scheduled_for_deletion' WHERE id = $1",
        )
        .bind(mailbox.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE domains SET mailbox_count = GREATEST(mailbox_count - 1, 0) WHERE id = $1",
        )
        .bind(mailbox.domain_id)
        .execute(&mut *tx)
        .await?;

        if self.release_on_delete {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET number_of_used_mailboxes = GREATEST(number_of_used_mailboxes - 1, 0),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(mailbox.subscription_id)
            .execute(&mut *tx)
            .await?;
        }

        jobs::enqueue(
            &mut tx,
            user_id,
            JobKind::DeleteMailbox,
            serde_json::json!({
                "mailbox_id": mailbox.id,
                "email": mailbox.email,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            mailbox_id = %mailbox.id,
            slot_released = self.release_on_delete,
            "Mailbox scheduled for deletion"
        );

        Ok(())
    }
}

/// Pick the subscription a new mailbox lands on. `candidates` arrives
/// ordered oldest first; the first row with spare capacity wins.
pub(crate) fn pick_candidate(candidates: &[CandidateRow]) -> Option<&CandidateRow> {
    candidates
        .iter()
        .find(|c| c.number_of_used_mailboxes < c.number_of_mailboxes)
}
