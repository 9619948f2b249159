//! Domain routes: availability, quotes, purchase, connect and listing.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use mailstack_billing::{
    CheckoutRedirect, Domain, DomainAvailability, DomainConnectReport, DomainPurchaseReport,
    DomainQuote,
};
use uuid::Uuid;
use mailstack_shared::PaymentMethod;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub domains: Vec<String>,
    pub years: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub domains: Vec<String>,
    pub years: Option<u32>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PurchaseResponse {
    Purchased { report: DomainPurchaseReport },
    Checkout { redirect: CheckoutRedirect },
}

pub async fn check_domains(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> ApiResult<Json<Vec<DomainAvailability>>> {
    let results = state.billing.domains.check(&req.domains).await?;
    Ok(Json(results))
}

pub async fn quote_domains(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> ApiResult<Json<Vec<DomainQuote>>> {
    let quotes = state
        .billing
        .domains
        .quote(&req.domains, req.years.unwrap_or(1))
        .await?;
    Ok(Json(quotes))
}

/// Buy domains. Wallet purchases register immediately with per-domain
/// failure reporting; Stripe purchases defer registration to the webhook.
pub async fn purchase_domains(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<Json<PurchaseResponse>> {
    if req.domains.is_empty() {
        return Err(ApiError::Validation("no domains given".into()));
    }
    let years = req.years.unwrap_or(1);

    match req.payment_method {
        PaymentMethod::Wallet => {
            let report = state
                .billing
                .domains
                .purchase_with_wallet(auth_user.user_id, &req.domains, years)
                .await?;
            Ok(Json(PurchaseResponse::Purchased { report }))
        }
        PaymentMethod::Stripe => {
            let quotes = state.billing.domains.quote(&req.domains, years).await?;
            let total_cents: i64 = quotes.iter().map(|q| q.price_cents).sum();

            let redirect = state
                .billing
                .checkout
                .domain_session(auth_user.user_id, &req.domains, years, total_cents)
                .await?;
            Ok(Json(PurchaseResponse::Checkout { redirect }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedirectRequest {
    pub domain_ids: Vec<Uuid>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub updated: u64,
}

/// Bring user-owned domains into the account. Capacity is bounded by the
/// user's paid Gsuite mailbox slots.
pub async fn connect_domains(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<DomainConnectReport>> {
    let report = state
        .billing
        .domains
        .connect(auth_user.user_id, &req.domains)
        .await?;
    Ok(Json(report))
}

pub async fn disconnect_domain(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(domain_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .domains
        .disconnect(auth_user.user_id, domain_id)
        .await?;
    Ok(Json(serde_json::json!({ "disconnected": domain_id })))
}

pub async fn set_redirect(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<RedirectRequest>,
) -> ApiResult<Json<RedirectResponse>> {
    let updated = state
        .billing
        .domains
        .set_redirect(auth_user.user_id, &req.domain_ids, req.redirect_url)
        .await?;
    Ok(Json(RedirectResponse { updated }))
}

pub async fn list_domains(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Domain>>> {
    let domains = state.billing.domains.list(auth_user.user_id).await?;
    Ok(Json(domains))
}
