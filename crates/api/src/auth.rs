use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::AppState;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";
pub const API_KEY_HEADER: &str = "x-api-key";

fn constant_time_eq(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Shared-secret gate for `/api/admin/*`. Missing header is 401, mismatch
/// is 403; the comparison itself is constant-time.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        None => ApiError::Unauthorized.into_response(),
        Some(value) if !constant_time_eq(value, &state.config.admin_password) => {
            tracing::warn!("admin_auth_rejected");
            ApiError::Forbidden.into_response()
        }
        Some(_) => next.run(request).await,
    }
}

/// Optional API-key gate for the native write endpoints. Accepts the
/// dedicated header or a bearer token; a no-op when no key is configured.
pub fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match provided {
        None => Err(ApiError::Unauthorized),
        Some(value) if !constant_time_eq(value, expected) => Err(ApiError::Forbidden),
        Some(_) => Ok(()),
    }
}
