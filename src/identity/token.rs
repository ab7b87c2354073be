//! Bearer tokens: ES256 (ECDSA over P-256) JWTs carrying the user id.
//!
//! The signing key is a P-256 secret scalar. It is persisted as base64 of its
//! SEC1 DER encoding so it can be handed to the server through configuration
//! and survive restarts; without one the server generates an ephemeral key.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid key format: {0}")]
    KeyFormat(String),
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userID")]
    user_id: String,
    iat: i64,
    exp: i64,
}

/// Fresh random signing key.
pub fn generate_key() -> Result<SecretKey, TokenError> {
    // A 32-byte draw is out of range (zero or >= curve order) with negligible probability
    for _ in 0..4 {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).map_err(|e| TokenError::Entropy(e.to_string()))?;
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            return Ok(key);
        }
    }
    Err(TokenError::Entropy("random source produced no valid P-256 scalar".into()))
}

pub fn encode_key(key: &SecretKey) -> Result<String, TokenError> {
    let der = key.to_sec1_der().map_err(|e| TokenError::KeyFormat(e.to_string()))?;
    Ok(STANDARD.encode(der.as_slice()))
}

pub fn decode_key(encoded: &str) -> Result<SecretKey, TokenError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TokenError::KeyFormat(format!("base64: {}", e)))?;
    SecretKey::from_sec1_der(&der).map_err(|e| TokenError::KeyFormat(format!("sec1: {}", e)))
}

/// Issues and verifies tokens. Built once at startup and shared read-only.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(key: &SecretKey, ttl: Duration) -> Result<Self, TokenError> {
        let private_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| TokenError::KeyFormat(e.to_string()))?;
        let public_pem = key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TokenError::KeyFormat(e.to_string()))?;
        let encoding = EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(|e| TokenError::KeyFormat(e.to_string()))?;
        let decoding = DecodingKey::from_ec_pem(public_pem.as_bytes()).map_err(|e| TokenError::KeyFormat(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Ok(Self { encoding, decoding, validation, ttl })
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn issue(&self, user_id: u64) -> Result<String, TokenError> {
        self.issue_at(user_id, chrono::Utc::now().timestamp())
    }

    pub(crate) fn issue_at(&self, user_id: u64, issued_at: i64) -> Result<String, TokenError> {
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.ttl.as_secs() as i64),
        };
        encode(&Header::new(Algorithm::ES256), &claims, &self.encoding).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// User id carried by a valid, unexpired token signed with this service's key.
    pub fn verify(&self, token: &str) -> Result<u64, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| TokenError::InvalidToken(format!("{:?}", e.kind())))?;
        data.claims
            .user_id
            .parse::<u64>()
            .map_err(|_| TokenError::InvalidToken(format!("userID claim {:?} is not a user id", data.claims.user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&generate_key().unwrap(), Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn issued_token_verifies_to_same_user() {
        let svc = service();
        let token = svc.issue(42).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(svc.verify(&token).unwrap(), 42);
    }

    #[test]
    fn token_from_another_key_is_rejected() {
        let a = service();
        let b = service();
        let token = a.issue(1).unwrap();
        assert!(matches!(b.verify(&token), Err(TokenError::InvalidToken(_))));
    }

    #[test]
    fn garbage_and_tampered_tokens_are_rejected() {
        let svc = service();
        assert!(matches!(svc.verify(""), Err(TokenError::InvalidToken(_))));
        assert!(matches!(svc.verify("a.b.c"), Err(TokenError::InvalidToken(_))));
        let token = svc.issue(5).unwrap();
        let forged = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"userID":"6","iat":0,"exp":9999999999}"#);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = forged.as_str();
        assert!(svc.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn non_numeric_user_claim_is_rejected() {
        let key = generate_key().unwrap();
        let svc = TokenService::new(&key, Duration::from_secs(60)).unwrap();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims { user_id: "alice".into(), iat: now, exp: now + 60 };
        let token = encode(&Header::new(Algorithm::ES256), &claims, &svc.encoding).unwrap();
        match svc.verify(&token) {
            Err(TokenError::InvalidToken(msg)) => assert!(msg.contains("alice")),
            other => panic!("expected InvalidToken, got {:?}", other),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service();
        let two_hours_ago = chrono::Utc::now().timestamp() - 7200;
        let token = svc.issue_at(9, two_hours_ago).unwrap();
        assert!(matches!(svc.verify(&token), Err(TokenError::InvalidToken(_))));
    }

    #[test]
    fn key_survives_encode_decode() {
        let key = generate_key().unwrap();
        let encoded = encode_key(&key).unwrap();
        let restored = decode_key(&encoded).unwrap();
        assert_eq!(key.to_bytes(), restored.to_bytes());

        // Tokens from before a restart still verify with the restored key
        let before = TokenService::new(&key, Duration::from_secs(60)).unwrap();
        let after = TokenService::new(&restored, Duration::from_secs(60)).unwrap();
        assert_eq!(after.verify(&before.issue(77).unwrap()).unwrap(), 77);
    }

    #[test]
    fn bad_key_material_is_a_format_error() {
        assert!(matches!(decode_key("not base64!"), Err(TokenError::KeyFormat(_))));
        assert!(matches!(decode_key(&STANDARD.encode(b"not a der key")), Err(TokenError::KeyFormat(_))));
    }
}
