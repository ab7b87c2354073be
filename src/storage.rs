//!
//! keeper storage
//! --------------
//! Records and the capability traits the rest of the crate programs against.
//!
//! - `CredentialStore` owns user records (login + password hash).
//! - `VaultStore` owns vault entries and their out-of-line payloads. It does not
//!   filter by owner; callers run `identity::ensure_owner` on everything they fetch.
//! - `HealthCheck` answers whether the backing store is reachable.
//!
//! Two implementations exist: `postgres` (metadata rows + large objects, used by
//! the server) and `memory` (test double with failure injection).

use async_trait::async_trait;
use thiserror::Error;

pub mod largeobject;
pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemoryCredentialStore, MemoryVaultStore};
pub use postgres::{PgCredentialStore, PgHealth, PgVaultStore};

/// Maximum login length accepted at sign-up, in characters.
pub const MAX_LOGIN_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub id: u64,
    pub key: String,
    pub value: Vec<u8>,
    /// Set at creation and never rewritten by `VaultStore::update`.
    pub owner_id: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    UserNotFound,
    #[error("user already exists")]
    DuplicateLogin,
    #[error("vault not found")]
    VaultNotFound,
    #[error("{op}: {source}")]
    Backend {
        op: String,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("connection pool: {0}")]
    Pool(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Wrap a driver error with the operation that produced it.
pub(crate) fn backend<S: Into<String>>(op: S) -> impl FnOnce(tokio_postgres::Error) -> StoreError {
    let op = op.into();
    move |source| StoreError::Backend { op, source }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_user(&self, id: u64) -> Result<User, StoreError>;
    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError>;
    /// Fails with `DuplicateLogin` when the login is taken, never overwrites.
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError>;
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    /// Also removes every vault entry the user owns, payloads included.
    async fn delete_user(&self, id: u64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Row and payload become visible together on commit, or not at all.
    async fn create(&self, owner_id: u64, key: &str, value: &[u8]) -> Result<VaultEntry, StoreError>;
    async fn get(&self, id: u64) -> Result<VaultEntry, StoreError>;
    /// Writes `key` and `value` into a fresh payload; `owner_id` on the argument is ignored.
    async fn update(&self, entry: &VaultEntry) -> Result<(), StoreError>;
    async fn delete(&self, id: u64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}
