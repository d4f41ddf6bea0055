//! Caller identity extraction.
//!
//! Authentication lives in an external service; by the time a request
//! reaches the chat API the caller is already authenticated and forwards
//! its user id in the `x-user-id` header. The extractor makes that
//! identity an explicit handler argument instead of an ambient lookup.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller's user id.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::Authorization(format!("missing {USER_ID_HEADER} header"))
            })?;

        Ok(Identity(value.to_string()))
    }
}
