//! Wire types and routes of the vault HTTP API, shared by the server and `client`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::VaultEntry;

pub const AUTH_SIGNUP_URI: &str = "/api/auth/signup";
pub const AUTH_SIGNIN_URI: &str = "/api/auth/signin";
pub const VAULT_URI: &str = "/api/vault";
pub const UPLOAD_URI: &str = "/api/upload";
pub const PING_URI: &str = "/api/ping";

/// Paths reachable without a bearer token.
pub const PUBLIC_PATHS: [&str; 3] = [AUTH_SIGNUP_URI, AUTH_SIGNIN_URI, PING_URI];

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 10 << 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignUpResponse {
    pub id: u64,
    pub login: String,
}

/// How `value` is carried in JSON. Absent means the bytes are UTF-8 text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    Base64,
}

/// Body of `POST /api/vault`. No id (or an empty one) creates; an id updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultRequest {
    #[serde(default, deserialize_with = "flexible_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<ValueEncoding>,
}

impl VaultRequest {
    /// Raw bytes of `value` after undoing `encoding`.
    pub fn value_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.encoding {
            Some(ValueEncoding::Base64) => STANDARD.decode(&self.value),
            None => Ok(self.value.as_bytes().to_vec()),
        }
    }
}

/// Ids arrive as numbers or as strings (`"1"`, `""`); a blank string means none.
fn flexible_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    match Option::<Raw>::deserialize(de)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid vault id {:?}", s))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultResponse {
    pub id: u64,
    pub key: String,
    pub value: String,
    pub user_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<ValueEncoding>,
}

impl VaultResponse {
    pub fn from_entry(entry: &VaultEntry) -> Self {
        let (value, encoding) = encode_value(&entry.value);
        Self { id: entry.id, key: entry.key.clone(), value, user_id: entry.owner_id, encoding }
    }

    pub fn value_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.encoding {
            Some(ValueEncoding::Base64) => STANDARD.decode(&self.value),
            None => Ok(self.value.as_bytes().to_vec()),
        }
    }
}

/// Upload responses carry no value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultSummary {
    pub id: u64,
    pub key: String,
    pub user_id: u64,
}

impl From<&VaultEntry> for VaultSummary {
    fn from(e: &VaultEntry) -> Self {
        Self { id: e.id, key: e.key.clone(), user_id: e.owner_id }
    }
}

/// UTF-8 passes through as text; anything else goes out as base64.
pub fn encode_value(bytes: &[u8]) -> (String, Option<ValueEncoding>) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), None),
        Err(_) => (STANDARD.encode(bytes), Some(ValueEncoding::Base64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_request_accepts_string_number_and_missing_ids() {
        let r: VaultRequest = serde_json::from_str(r#"{"id":"","key":"k","value":"v"}"#).unwrap();
        assert_eq!(r.id, None);
        let r: VaultRequest = serde_json::from_str(r#"{"id":"12","key":"k","value":"v"}"#).unwrap();
        assert_eq!(r.id, Some(12));
        let r: VaultRequest = serde_json::from_str(r#"{"id":7,"key":"k"}"#).unwrap();
        assert_eq!(r.id, Some(7));
        assert_eq!(r.value, "");
        let r: VaultRequest = serde_json::from_str(r#"{"key":"k","value":"v"}"#).unwrap();
        assert_eq!(r.id, None);
        let r: VaultRequest = serde_json::from_str(r#"{"id":null}"#).unwrap();
        assert_eq!(r.id, None);
        assert!(serde_json::from_str::<VaultRequest>(r#"{"id":"abc"}"#).is_err());
        assert!(serde_json::from_str::<VaultRequest>(r#"{"id":-1}"#).is_err());
    }

    #[test]
    fn response_uses_user_id_field_and_omits_text_encoding() {
        let e = VaultEntry { id: 1, key: "k".into(), value: b"v".to_vec(), owner_id: 9 };
        let v = serde_json::to_value(VaultResponse::from_entry(&e)).unwrap();
        assert_eq!(v, serde_json::json!({"id": 1, "key": "k", "value": "v", "user_id": 9}));
    }

    #[test]
    fn binary_values_travel_as_base64() {
        let e = VaultEntry { id: 2, key: "bin".into(), value: vec![0xff, 0x00, 0xfe], owner_id: 1 };
        let r = VaultResponse::from_entry(&e);
        assert_eq!(r.encoding, Some(ValueEncoding::Base64));
        assert_eq!(r.value_bytes().unwrap(), e.value);

        let req: VaultRequest = serde_json::from_str(&format!(r#"{{"key":"bin","value":"{}","encoding":"base64"}}"#, r.value)).unwrap();
        assert_eq!(req.value_bytes().unwrap(), e.value);
    }
}
