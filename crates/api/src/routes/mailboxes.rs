//! Mailbox provisioning routes.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use mailstack_billing::{AssignMailboxRequest, Mailbox, QuotaSummary};
use mailstack_shared::MailboxType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateMailboxRequest {
    pub domain_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub mailbox_type: MailboxType,
}

#[derive(Debug, Serialize)]
pub struct MailboxResponse {
    pub mailbox: Mailbox,
    pub quota: QuotaSummary,
}

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    pub mailbox_type: MailboxType,
}

/// Create a mailbox against the user's paid capacity.
pub async fn create_mailbox(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateMailboxRequest>,
) -> ApiResult<Json<MailboxResponse>> {
    if req.email.trim().is_empty() {
        return Err(ApiError::Validation("email must not be empty".into()));
    }

    let mailbox = state
        .billing
        .allocator
        .assign_mailbox(AssignMailboxRequest {
            user_id: auth_user.user_id,
            domain_id: req.domain_id,
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            mailbox_type: req.mailbox_type,
        })
        .await?;

    let quota = state
        .billing
        .allocator
        .quota(auth_user.user_id, req.mailbox_type)
        .await?;

    Ok(Json(MailboxResponse { mailbox, quota }))
}

/// Schedule a mailbox for deletion.
pub async fn delete_mailbox(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(mailbox_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .allocator
        .release_mailbox(auth_user.user_id, mailbox_id)
        .await?;

    Ok(Json(serde_json::json!({
        "mailbox_id": mailbox_id,
        "status": "scheduled_for_deletion",
    })))
}

/// Capacity summary for one mailbox type.
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<QuotaQuery>,
) -> ApiResult<Json<QuotaSummary>> {
    let quota = state
        .billing
        .allocator
        .quota(auth_user.user_id, query.mailbox_type)
        .await?;

    Ok(Json(quota))
}
