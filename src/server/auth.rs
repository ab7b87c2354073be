use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::AppState;
use crate::api::{Credentials, SignUpResponse};
use crate::error::{AppError, AppResult};

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| AppError::user("bad_request", format!("invalid request body: {}", e)))
}

/// `POST /api/auth/signup` -> 201 with `{id, login}`.
pub async fn sign_up(State(state): State<AppState>, body: Bytes) -> AppResult<(StatusCode, Json<SignUpResponse>)> {
    let req: Credentials = parse_json(&body)?;
    let user = state.auth.sign_up(&req.login, &req.password).await?;
    Ok((StatusCode::CREATED, Json(SignUpResponse { id: user.id, login: user.login })))
}

/// `POST /api/auth/signin` -> 200, token in the `Authorization` header, empty body.
pub async fn sign_in(State(state): State<AppState>, body: Bytes) -> AppResult<Response> {
    let req: Credentials = parse_json(&body)?;
    let token = state.auth.sign_in(&req.login, &req.password).await?;
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| AppError::internal("token_header", e.to_string()))?;
    Ok((StatusCode::OK, [(header::AUTHORIZATION, value)]).into_response())
}
