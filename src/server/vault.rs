//! Vault handlers. Every entry fetched from the store goes through
//! `ensure_owner` before it is changed or echoed back.

use axum::body::Bytes;
use axum::extract::multipart::Multipart;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use super::auth::parse_json;
use super::AppState;
use crate::api::{VaultRequest, VaultResponse, VaultSummary};
use crate::error::{AppError, AppResult};
use crate::identity::{ensure_owner, Identity};
use crate::storage::VaultEntry;

const FILE_FIELD: &str = "file";

fn parse_id(raw: &str) -> AppResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::user("invalid_vault_id", format!("invalid vault id {:?}", raw)))
}

/// Fetch an entry and check the caller owns it.
async fn owned_entry(state: &AppState, identity: &Identity, id: u64) -> AppResult<VaultEntry> {
    let entry = state.vaults.get(id).await?;
    ensure_owner(identity, &entry)?;
    Ok(entry)
}

/// Fill in the non-empty parts of a change, keep the rest.
fn apply_change(entry: &mut VaultEntry, key: String, value: Vec<u8>) {
    if !key.is_empty() { entry.key = key; }
    if !value.is_empty() { entry.value = value; }
}

/// `POST /api/vault`: create without an id (201), update with one (200).
pub async fn put(
    State(state): State<AppState>,
    identity: Identity,
    body: Bytes,
) -> AppResult<(StatusCode, Json<VaultResponse>)> {
    let req: VaultRequest = parse_json(&body)?;
    let value = req
        .value_bytes()
        .map_err(|e| AppError::user("bad_request", format!("invalid base64 value: {}", e)))?;

    match req.id {
        None => {
            let entry = state.vaults.create(identity.user_id, &req.key, &value).await?;
            info!(target: "vault", vault_id = entry.id, user_id = identity.user_id, "vault created");
            Ok((StatusCode::CREATED, Json(VaultResponse::from_entry(&entry))))
        }
        Some(id) => {
            let mut entry = owned_entry(&state, &identity, id).await?;
            apply_change(&mut entry, req.key, value);
            state.vaults.update(&entry).await?;
            info!(target: "vault", vault_id = entry.id, user_id = identity.user_id, "vault updated");
            Ok((StatusCode::OK, Json(VaultResponse::from_entry(&entry))))
        }
    }
}

/// `GET /api/vault/{id}`
pub async fn get(
    State(state): State<AppState>,
    identity: Identity,
    Path(raw): Path<String>,
) -> AppResult<Json<VaultResponse>> {
    let id = parse_id(&raw)?;
    let entry = owned_entry(&state, &identity, id).await?;
    Ok(Json(VaultResponse::from_entry(&entry)))
}

/// `GET /api/vault/` with the id left off.
pub async fn missing_id(_identity: Identity) -> AppError {
    AppError::user("missing_vault_id", "vault id is missing")
}

/// Pull the `file` part out of a multipart body: (file name, contents).
async fn read_file(mut multipart: Multipart) -> AppResult<(String, Vec<u8>)> {
    loop {
        let field = multipart.next_field().await.map_err(multipart_error)?;
        let Some(field) = field else {
            return Err(AppError::user("missing_file", "multipart field \"file\" is missing"));
        };
        if field.name() != Some(FILE_FIELD) { continue; }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        return Ok((name, data.to_vec()));
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::too_large("payload_too_large", "file is larger than 10MB")
    } else {
        AppError::user("bad_multipart", e.body_text())
    }
}

/// `POST /api/upload`: new entry keyed by the file name (201).
pub async fn upload(
    State(state): State<AppState>,
    identity: Identity,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<VaultSummary>)> {
    let (name, data) = read_file(multipart).await?;
    let entry = state.vaults.create(identity.user_id, &name, &data).await?;
    info!(target: "vault", vault_id = entry.id, user_id = identity.user_id, bytes = data.len(), "file uploaded");
    Ok((StatusCode::CREATED, Json(VaultSummary::from(&entry))))
}

/// `POST /api/upload/{id}`: replace an entry the caller owns (200).
pub async fn upload_into(
    State(state): State<AppState>,
    identity: Identity,
    Path(raw): Path<String>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<VaultSummary>)> {
    let id = parse_id(&raw)?;
    let mut entry = owned_entry(&state, &identity, id).await?;
    let (name, data) = read_file(multipart).await?;
    let bytes = data.len();
    apply_change(&mut entry, name, data);
    state.vaults.update(&entry).await?;
    info!(target: "vault", vault_id = entry.id, user_id = identity.user_id, bytes, "file replaced");
    Ok((StatusCode::OK, Json(VaultSummary::from(&entry))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_unsigned_integers() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert_eq!(parse_id("abc").unwrap_err().http_status(), 400);
        assert_eq!(parse_id("-1").unwrap_err().http_status(), 400);
    }

    #[test]
    fn empty_fields_leave_the_entry_alone() {
        let mut e = VaultEntry { id: 1, key: "k".into(), value: b"v".to_vec(), owner_id: 1 };
        apply_change(&mut e, String::new(), Vec::new());
        assert_eq!((e.key.as_str(), e.value.as_slice()), ("k", &b"v"[..]));
        apply_change(&mut e, "k2".into(), Vec::new());
        assert_eq!(e.key, "k2");
        assert_eq!(e.value, b"v");
    }
}
