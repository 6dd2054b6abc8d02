use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::responses::ApiError;
use crate::domain::OwnerId;

/// Header carrying the authenticated caller's user id, set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub OwnerId);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(OwnerId::from(value)))
            .ok_or_else(ApiError::unauthorized)
    }
}
