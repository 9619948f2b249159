//! Pre-warmed mailbox pool routes.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use mailstack_billing::{CheckoutRedirect, PrewarmMailbox, PrewarmOffer, PrewarmPurchaseOutcome};
use mailstack_shared::PaymentMethod;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub emails: Vec<String>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PurchaseResponse {
    Purchased { outcome: PrewarmPurchaseOutcome },
    Checkout { redirect: CheckoutRedirect },
}

/// Warm inventory on sale to this user.
pub async fn list_available(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<AvailableQuery>,
) -> ApiResult<Json<Vec<PrewarmOffer>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offers = state
        .billing
        .prewarm
        .list_available(auth_user.user_id, limit)
        .await?;
    Ok(Json(offers))
}

pub async fn list_mine(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<PrewarmMailbox>>> {
    let mailboxes = state.billing.prewarm.list_owned(auth_user.user_id).await?;
    Ok(Json(mailboxes))
}

/// Buy specific warm mailboxes. Wallet purchases claim immediately;
/// Stripe purchases claim on the completed webhook.
pub async fn purchase(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<Json<PurchaseResponse>> {
    if req.emails.is_empty() {
        return Err(ApiError::Validation("no mailboxes selected".into()));
    }

    match req.payment_method {
        PaymentMethod::Wallet => {
            let outcome = state
                .billing
                .prewarm
                .purchase_with_wallet(auth_user.user_id, &req.emails)
                .await?;
            Ok(Json(PurchaseResponse::Purchased { outcome }))
        }
        PaymentMethod::Stripe => {
            let unit_price = state
                .billing
                .prewarm
                .wallet_unit_price_cents(auth_user.user_id, &req.emails)
                .await?;

            let redirect = state
                .billing
                .checkout
                .prewarm_session(auth_user.user_id, &req.emails, unit_price)
                .await?;
            Ok(Json(PurchaseResponse::Checkout { redirect }))
        }
    }
}
