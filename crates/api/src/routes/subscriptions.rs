//! Subscription routes: plans, add-on packs, cancellation and plan change.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use mailstack_billing::{
    CancelMode, CheckoutRedirect, Plan, PlanChangeOutcome, Subscription,
};
use mailstack_shared::{MailboxType, PaymentMethod};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PurchasePlanRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseMailboxesRequest {
    pub mailbox_type: MailboxType,
    pub quantity: i32,
    pub payment_method: PaymentMethod,
}

/// Either an immediate wallet grant or a redirect to Stripe Checkout.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PurchaseMailboxesResponse {
    Granted { subscription: Subscription },
    Checkout { redirect: CheckoutRedirect },
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// "immediate" or "at_period_end"; defaults to period end.
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: Uuid,
}

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.billing.subscriptions.list_active_plans().await?;
    Ok(Json(plans))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let subscriptions = state.billing.subscriptions.list(auth_user.user_id).await?;
    Ok(Json(subscriptions))
}

/// Start a Stripe Checkout session for a base plan. The subscription row
/// is written by the completed webhook, never here.
pub async fn purchase_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PurchasePlanRequest>,
) -> ApiResult<Json<CheckoutRedirect>> {
    let plan = state.billing.subscriptions.get_plan(req.plan_id).await?;
    if !plan.active {
        return Err(ApiError::Validation("plan is not available".into()));
    }

    let redirect = state
        .billing
        .checkout
        .plan_session(auth_user.user_id, &plan)
        .await?;
    Ok(Json(redirect))
}

/// Buy additional mailbox capacity. Wallet purchases grant immediately;
/// Stripe purchases return a checkout redirect and grant on the webhook.
pub async fn purchase_mailboxes(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PurchaseMailboxesRequest>,
) -> ApiResult<Json<PurchaseMailboxesResponse>> {
    if req.quantity <= 0 {
        return Err(ApiError::Validation("quantity must be positive".into()));
    }

    match req.payment_method {
        PaymentMethod::Wallet => {
            let subscription = state
                .billing
                .subscriptions
                .purchase_mailboxes_with_wallet(auth_user.user_id, req.mailbox_type, req.quantity)
                .await?;
            Ok(Json(PurchaseMailboxesResponse::Granted { subscription }))
        }
        PaymentMethod::Stripe => {
            let redirect = state
                .billing
                .checkout
                .addon_session(auth_user.user_id, req.mailbox_type, req.quantity as i64)
                .await?;
            Ok(Json(PurchaseMailboxesResponse::Checkout { redirect }))
        }
    }
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<Subscription>> {
    let mode = match req.mode.as_deref() {
        None | Some("at_period_end") => CancelMode::AtPeriodEnd,
        Some("immediate") => CancelMode::Immediate,
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "unknown cancel mode: {other}"
            )))
        }
    };

    let subscription = state
        .billing
        .subscriptions
        .cancel(auth_user.user_id, subscription_id, mode)
        .await?;
    Ok(Json(subscription))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChangeOutcome>> {
    let outcome = state
        .billing
        .subscriptions
        .change_plan(auth_user.user_id, req.plan_id)
        .await?;
    Ok(Json(outcome))
}
