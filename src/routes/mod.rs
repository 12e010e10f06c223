use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;

pub mod admin;
pub mod health;
pub mod metrics;
pub mod photos;
pub mod status;
pub mod uploads;

/// Header carrying the authenticated owner id, set by the upstream gateway.
pub const OWNER_ID_HEADER: &str = "x-user-id";

/// Owner of the request, taken from [`OWNER_ID_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", OWNER_ID_HEADER)))?;

        Uuid::parse_str(value.trim())
            .map(OwnerId)
            .map_err(|_| AppError::Unauthorized(format!("invalid {} header", OWNER_ID_HEADER)))
    }
}
