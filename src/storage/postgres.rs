use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use super::largeobject;
use super::{backend, CredentialStore, HealthCheck, StoreError, User, VaultEntry, VaultStore};

/// Tables the server needs; safe to run on every start.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id       BIGSERIAL PRIMARY KEY,
    login    VARCHAR(50) NOT NULL UNIQUE,
    password TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS vault (
    id      BIGSERIAL PRIMARY KEY,
    key     TEXT NOT NULL DEFAULT '',
    value   OID NOT NULL,
    user_id BIGINT NOT NULL REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS vault_user_id_idx ON vault (user_id);
"#;

/// Build a connection pool for `uri`. Connections are opened lazily.
pub fn connect(uri: &str, pool_size: usize) -> Result<Pool, StoreError> {
    let pg_config: tokio_postgres::Config = uri.parse().map_err(backend("parse database uri"))?;
    let mgr = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
    Pool::builder(mgr)
        .max_size(pool_size.max(1))
        .build()
        .map_err(|e| StoreError::Pool(e.to_string()))
}

pub async fn ensure_schema(pool: &Pool) -> Result<(), StoreError> {
    let conn = checkout(pool).await?;
    conn.batch_execute(SCHEMA_SQL).await.map_err(backend("create schema"))?;
    info!(target: "storage", "schema ready");
    Ok(())
}

async fn checkout(pool: &Pool) -> Result<Object, StoreError> {
    pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
}

fn to_db_id(id: u64) -> i64 { id as i64 }
fn from_db_id(id: i64) -> u64 { id as u64 }

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: Pool,
}

impl PgCredentialStore {
    pub fn new(pool: Pool) -> Self { Self { pool } }
}

fn user_from_row(row: &tokio_postgres::Row) -> User {
    User { id: from_db_id(row.get(0)), login: row.get(1), password_hash: row.get(2) }
}

fn unique_or(op: &'static str) -> impl FnOnce(tokio_postgres::Error) -> StoreError {
    move |e| {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            StoreError::DuplicateLogin
        } else {
            StoreError::Backend { op: op.to_string(), source: e }
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get_user(&self, id: u64) -> Result<User, StoreError> {
        let conn = checkout(&self.pool).await?;
        let row = conn
            .query_opt("SELECT id, login, password FROM users WHERE id = $1", &[&to_db_id(id)])
            .await
            .map_err(backend(format!("get user {}", id)))?;
        row.as_ref().map(user_from_row).ok_or(StoreError::UserNotFound)
    }

    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError> {
        let conn = checkout(&self.pool).await?;
        let row = conn
            .query_opt("SELECT id, login, password FROM users WHERE login = $1", &[&login])
            .await
            .map_err(backend("get user by login"))?;
        row.as_ref().map(user_from_row).ok_or(StoreError::UserNotFound)
    }

    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let conn = checkout(&self.pool).await?;
        let row = conn
            .query_one(
                "INSERT INTO users (login, password) VALUES ($1, $2) RETURNING id",
                &[&login, &password_hash],
            )
            .await
            .map_err(unique_or("create user"))?;
        let id = from_db_id(row.get(0));
        debug!(target: "storage", user_id = id, "user created");
        Ok(User { id, login: login.to_string(), password_hash: password_hash.to_string() })
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = checkout(&self.pool).await?;
        let n = conn
            .execute(
                "UPDATE users SET login = $1, password = $2 WHERE id = $3",
                &[&user.login, &user.password_hash, &to_db_id(user.id)],
            )
            .await
            .map_err(unique_or("update user"))?;
        if n == 0 { return Err(StoreError::UserNotFound); }
        Ok(())
    }

    /// Removes the user together with their vault rows and payloads in one transaction.
    async fn delete_user(&self, id: u64) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.transaction().await.map_err(backend("begin delete user"))?;

        let rows = tx
            .query("DELETE FROM vault WHERE user_id = $1 RETURNING value", &[&to_db_id(id)])
            .await
            .map_err(backend(format!("delete vaults of user {}", id)))?;
        for row in &rows {
            largeobject::unlink(&tx, row.get(0)).await?;
        }
        let n = tx
            .execute("DELETE FROM users WHERE id = $1", &[&to_db_id(id)])
            .await
            .map_err(backend(format!("delete user {}", id)))?;
        if n == 0 { return Err(StoreError::UserNotFound); }
        tx.commit().await.map_err(backend(format!("commit delete user {}", id)))?;

        debug!(target: "storage", user_id = id, entries = rows.len(), "user deleted");
        Ok(())
    }
}

/// Vault rows in `vault`, values in large objects referenced by `vault.value`.
/// Every operation runs in one transaction; an early return drops it uncommitted,
/// which rolls back the row and any large object created so far.
#[derive(Clone)]
pub struct PgVaultStore {
    pool: Pool,
}

impl PgVaultStore {
    pub fn new(pool: Pool) -> Self { Self { pool } }
}

#[async_trait]
impl VaultStore for PgVaultStore {
    async fn create(&self, owner_id: u64, key: &str, value: &[u8]) -> Result<VaultEntry, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.transaction().await.map_err(backend("begin create vault"))?;

        let oid = largeobject::create(&tx).await?;
        let row = tx
            .query_one(
                "INSERT INTO vault (key, value, user_id) VALUES ($1, $2, $3) RETURNING id",
                &[&key, &oid, &to_db_id(owner_id)],
            )
            .await
            .map_err(backend("insert vault row"))?;
        let id = from_db_id(row.get(0));
        largeobject::write_all(&tx, oid, value).await?;
        tx.commit().await.map_err(backend(format!("commit vault {}", id)))?;

        debug!(target: "storage", vault_id = id, oid, bytes = value.len(), "vault created");
        Ok(VaultEntry { id, key: key.to_string(), value: value.to_vec(), owner_id })
    }

    async fn get(&self, id: u64) -> Result<VaultEntry, StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.transaction().await.map_err(backend("begin get vault"))?;

        let row = tx
            .query_opt("SELECT key, value, user_id FROM vault WHERE id = $1", &[&to_db_id(id)])
            .await
            .map_err(backend(format!("get vault {}", id)))?
            .ok_or(StoreError::VaultNotFound)?;
        let key: String = row.get(0);
        let oid: u32 = row.get(1);
        let owner_id = from_db_id(row.get(2));
        let value = largeobject::read_all(&tx, oid).await?;
        tx.rollback().await.map_err(backend(format!("end get vault {}", id)))?;

        Ok(VaultEntry { id, key, value, owner_id })
    }

    async fn update(&self, entry: &VaultEntry) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.transaction().await.map_err(backend("begin update vault"))?;

        let old_oid: u32 = tx
            .query_opt("SELECT value FROM vault WHERE id = $1 FOR UPDATE", &[&to_db_id(entry.id)])
            .await
            .map_err(backend(format!("lock vault {}", entry.id)))?
            .ok_or(StoreError::VaultNotFound)?
            .get(0);

        let oid = largeobject::create(&tx).await?;
        tx.execute(
            "UPDATE vault SET key = $1, value = $2 WHERE id = $3",
            &[&entry.key, &oid, &to_db_id(entry.id)],
        )
        .await
        .map_err(backend(format!("update vault {}", entry.id)))?;
        largeobject::write_all(&tx, oid, &entry.value).await?;
        largeobject::unlink(&tx, old_oid).await?;
        tx.commit().await.map_err(backend(format!("commit vault {}", entry.id)))?;

        debug!(target: "storage", vault_id = entry.id, oid, old_oid, "vault updated");
        Ok(())
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool).await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.transaction().await.map_err(backend("begin delete vault"))?;

        let oid: u32 = tx
            .query_opt("DELETE FROM vault WHERE id = $1 RETURNING value", &[&to_db_id(id)])
            .await
            .map_err(backend(format!("delete vault {}", id)))?
            .ok_or(StoreError::VaultNotFound)?
            .get(0);
        largeobject::unlink(&tx, oid).await?;
        tx.commit().await.map_err(backend(format!("commit delete vault {}", id)))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgHealth {
    pool: Pool,
}

impl PgHealth {
    pub fn new(pool: Pool) -> Self { Self { pool } }
}

#[async_trait]
impl HealthCheck for PgHealth {
    async fn ping(&self) -> Result<(), StoreError> {
        let conn = checkout(&self.pool).await?;
        conn.simple_query("SELECT 1").await.map_err(backend("ping"))?;
        Ok(())
    }
}
