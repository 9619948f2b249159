//! API key authentication.
//!
//! Clients send `X-API-Key`; only the SHA-256 hash of the key is stored,
//! so a leaked database dump never yields usable credentials.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// Identity attached to the request after successful authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[derive(FromRow)]
struct ApiKeyRow {
    user_id: Uuid,
}

pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Middleware that requires a valid API key.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let Some(key) = key else {
        tracing::warn!(path = %request.uri().path(), "Missing API key");
        return ApiError::Unauthorized.into_response();
    };

    let row: Result<Option<ApiKeyRow>, sqlx::Error> = sqlx::query_as(
        r#"
        SELECT user_id
        FROM api_keys
        WHERE key_hash = $1 AND active
        "#,
    )
    .bind(hash_api_key(&key))
    .fetch_optional(&state.pool)
    .await;

    match row {
        Ok(Some(row)) => {
            request.extensions_mut().insert(AuthUser {
                user_id: row.user_id,
            });
            next.run(request).await
        }
        Ok(None) => {
            tracing::warn!(path = %request.uri().path(), "Unknown API key");
            ApiError::Unauthorized.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "API key lookup failed");
            ApiError::Database(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let hash = hash_api_key("msk_test_key");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_api_key("msk_test_key"));
        assert_ne!(hash, hash_api_key("msk_other_key"));
    }
}
