use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The user a request was authenticated as. Rebuilt from the bearer token on
/// every request by the session binder and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: u64,
}

impl Identity {
    pub fn new(user_id: u64) -> Self { Self { user_id } }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only present when the route sits behind `bind_session`
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or_else(|| AppError::auth("unauthenticated", "authorization header is missing"))
    }
}
