//! Provisioning job queue.
//!
//! Fulfilment (actually creating or tearing down mailboxes at the provider)
//! is done by an external system that polls the `jobs` table. The billing
//! core only writes rows.

use mailstack_shared::JobKind;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::BillingResult;

/// Enqueue a job within an existing transaction so the job row commits or
/// rolls back together with the state change that requires it.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    kind: JobKind,
    payload: serde_json::Value,
) -> BillingResult<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO jobs (id, user_id, job_type, payload, status, created_at)
        VALUES ($1, $2, $3, $4, 'pending', NOW())
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(kind.as_str())
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}
