//! Wallet routes.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use mailstack_billing::{CheckoutRedirect, Wallet, WalletTransaction};
use serde::Deserialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub amount_cents: i64,
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Wallet>> {
    let wallet = state.billing.wallet.get_or_create(auth_user.user_id).await?;
    Ok(Json(wallet))
}

pub async fn get_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<WalletTransaction>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let history = state
        .billing
        .wallet
        .history(auth_user.user_id, limit)
        .await?;
    Ok(Json(history))
}

/// Start a Stripe Checkout session that credits the wallet on completion.
pub async fn create_topup_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<TopupRequest>,
) -> ApiResult<Json<CheckoutRedirect>> {
    let redirect = state
        .billing
        .checkout
        .topup_session(auth_user.user_id, req.amount_cents)
        .await?;
    Ok(Json(redirect))
}
