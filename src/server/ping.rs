use axum::extract::State;
use axum::http::StatusCode;

use super::AppState;
use crate::error::AppResult;

/// `GET /api/ping` -> 200 when the backing store answers.
pub async fn ping(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.health.ping().await?;
    Ok(StatusCode::OK)
}
