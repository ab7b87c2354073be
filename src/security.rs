//! Password hashing for stored credentials.
//!
//! Argon2id PHC strings with a random 16-byte salt. The cost parameters travel
//! inside the PHC string, so verification always uses whatever cost the hash
//! was produced with; only `hash` depends on the configured `Params`.

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;

/// Longest plaintext accepted by `Hasher::hash`, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password is longer than {max} bytes")]
    TooLong { max: usize },
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("hash password: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct Hasher {
    params: Params,
}

impl Default for Hasher {
    fn default() -> Self { Self::production() }
}

impl Hasher {
    pub fn new(params: Params) -> Self { Self { params } }

    /// Argon2 recommended defaults (19 MiB, 2 passes).
    pub fn production() -> Self { Self::new(Params::default()) }

    /// Minimum cost; used by tests and benches so hashing stays fast and deterministic in cost.
    pub fn fast() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
            .unwrap_or_default();
        Self::new(params)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::TooLong { max: MAX_PASSWORD_BYTES });
        }
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| HashError::Entropy(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Backend(e.to_string()))?;
        let phc = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| HashError::Backend(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    /// False on mismatch and on a malformed stored hash; never an error.
    pub fn matches(&self, hash: &str, password: &str) -> bool {
        if let Ok(parsed) = PasswordHash::new(hash) {
            self.argon2().verify_password(password.as_bytes(), &parsed).is_ok()
        } else { false }
    }
}
