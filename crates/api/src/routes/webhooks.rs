//! Stripe webhook endpoint.
//!
//! The only route that takes the raw request body: signature verification
//! runs over the exact bytes Stripe signed. After a verified event is
//! accepted the response is always 200, whatever reconciliation did; a
//! non-2xx would make Stripe retry an event we have already recorded.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook with bad signature");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_signature" })),
            )
                .into_response();
        }
    };

    let event_id = event.id.to_string();
    if let Err(e) = state.billing.webhooks.handle_event(event).await {
        tracing::error!(event_id = %event_id, error = %e, "Webhook processing failed");
    }

    Json(json!({ "received": true })).into_response()
}
