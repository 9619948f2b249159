//! Order records.
//!
//! Every settled purchase or renewal leaves one row here, regardless of
//! payment rail. Orders are append-only.

use mailstack_shared::{OrderType, PaymentMethod};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::BillingResult;

pub async fn record(
    pool: &PgPool,
    user_id: Uuid,
    order_type: OrderType,
    amount_cents: i64,
    payment_method: PaymentMethod,
    reference: Option<Uuid>,
) -> BillingResult<Uuid> {
    let mut tx = pool.begin().await?;
    let id = record_in_tx(&mut tx, user_id, order_type, amount_cents, payment_method, reference)
        .await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn record_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    order_type: OrderType,
    amount_cents: i64,
    payment_method: PaymentMethod,
    reference: Option<Uuid>,
) -> BillingResult<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO orders
            (id, user_id, order_type, amount_cents, currency, payment_method, reference, status, created_at)
        VALUES ($1, $2, $3, $4, 'usd', $5, $6, 'paid', NOW())
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(order_type.as_str())
    .bind(amount_cents)
    .bind(payment_method.as_str())
    .bind(reference)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}
