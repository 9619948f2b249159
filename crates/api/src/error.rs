//! API error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mailstack_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl ApiError {
    /// Stable machine-readable code for the JSON body.
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Validation(_) => "validation_error",
            Self::NotFound => "not_found",
            Self::Database(_) => "internal_error",
            Self::Billing(e) => match e {
                BillingError::Validation(_) => "validation_error",
                BillingError::WebhookSignatureInvalid => "invalid_signature",
                BillingError::NotFound(_) => "not_found",
                BillingError::MailboxExists(_) => "mailbox_exists",
                BillingError::InsufficientBalance { .. } => "insufficient_balance",
                BillingError::NoCapacity => "no_capacity",
                BillingError::NoActiveSubscription(_) => "no_active_subscription",
                BillingError::ConcurrentModification => "conflict",
                BillingError::Stripe(_) => "payment_provider_error",
                BillingError::Registrar(_) => "registrar_error",
                BillingError::Database(_) | BillingError::Internal(_) => "internal_error",
            },
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Billing(e) => match e {
                BillingError::Validation(_) | BillingError::WebhookSignatureInvalid => {
                    StatusCode::BAD_REQUEST
                }
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::MailboxExists(_)
                | BillingError::NoCapacity
                | BillingError::NoActiveSubscription(_)
                | BillingError::ConcurrentModification => StatusCode::CONFLICT,
                BillingError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::Stripe(_) | BillingError::Registrar(_) => StatusCode::BAD_GATEWAY,
                BillingError::Database(_) | BillingError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Internal detail never leaves the server; the client gets a generic
    /// message for 5xx responses.
    fn public_message(&self) -> String {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                if let Self::Billing(BillingError::Stripe(_) | BillingError::Registrar(_)) = self {
                    "Upstream provider error".to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_errors_map_to_expected_statuses() {
        let cases = [
            (
                ApiError::Billing(BillingError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Billing(BillingError::NotFound("wallet".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Billing(BillingError::MailboxExists("a@b.com".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Billing(BillingError::InsufficientBalance {
                    required_cents: 500,
                    available_cents: 100,
                }),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ApiError::Billing(BillingError::NoCapacity),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Billing(BillingError::NoActiveSubscription("gsuite".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Billing(BillingError::Stripe("timeout".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Billing(BillingError::Database("oops".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{error}");
        }
    }

    #[test]
    fn server_errors_do_not_leak_detail() {
        let error = ApiError::Billing(BillingError::Database("password=hunter2".into()));
        assert_eq!(error.public_message(), "Internal server error");

        let error = ApiError::Billing(BillingError::Stripe("sk_live_abc".into()));
        assert_eq!(error.public_message(), "Upstream provider error");
    }
}
