//! Caller identity extractor.
//!
//! Authentication happens upstream; the authenticated user id arrives in the
//! `X-User-Id` header. A missing or blank header is rejected with 401 before
//! the handler runs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized("Missing user identity. Provide it via the 'X-User-Id' header.".to_string())
        })?;

        let user_id = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid X-User-Id header encoding".to_string()))?
            .trim();
        if user_id.is_empty() {
            return Err(AppError::Unauthorized("Empty X-User-Id header".to_string()));
        }

        Ok(UserId(user_id.to_string()))
    }
}
