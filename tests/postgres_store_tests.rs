//! Runs against a real PostgreSQL when KEEPER_TEST_DATABASE_URI is set; otherwise each test is a no-op.

use anyhow::Result;

use keeper::storage::postgres::{connect, ensure_schema};
use keeper::storage::{CredentialStore, HealthCheck, PgCredentialStore, PgHealth, PgVaultStore, StoreError, VaultStore};
use keeper::tprintln;

fn database_uri() -> Option<String> {
    match std::env::var("KEEPER_TEST_DATABASE_URI") {
        Ok(uri) if !uri.trim().is_empty() => Some(uri),
        _ => {
            tprintln!("KEEPER_TEST_DATABASE_URI not set; skipping PostgreSQL store test");
            None
        }
    }
}

/// Unique login per run so tests can share a database.
fn login(prefix: &str) -> String {
    let mut b = [0u8; 6];
    let _ = getrandom::getrandom(&mut b);
    let suffix: String = b.iter().map(|x| format!("{:02x}", x)).collect();
    format!("{}-{}", prefix, suffix)
}

#[tokio::test]
async fn vault_round_trip_update_and_delete() -> Result<()> {
    let Some(uri) = database_uri() else { return Ok(()) };
    let pool = connect(&uri, 4)?;
    ensure_schema(&pool).await?;
    PgHealth::new(pool.clone()).ping().await?;

    let users = PgCredentialStore::new(pool.clone());
    let vaults = PgVaultStore::new(pool.clone());
    let owner = users.create_user(&login("pg-owner"), "hash").await?;

    let value: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let created = vaults.create(owner.id, "big", &value).await?;
    let fetched = vaults.get(created.id).await?;
    assert_eq!(fetched.value, value);
    assert_eq!(fetched.owner_id, owner.id);

    let mut changed = fetched.clone();
    changed.key = "big2".into();
    changed.value = b"small".to_vec();
    vaults.update(&changed).await?;
    let after = vaults.get(created.id).await?;
    assert_eq!(after.key, "big2");
    assert_eq!(after.value, b"small");

    vaults.delete(created.id).await?;
    assert!(matches!(vaults.get(created.id).await, Err(StoreError::VaultNotFound)));
    assert!(matches!(vaults.delete(created.id).await, Err(StoreError::VaultNotFound)));
    Ok(())
}

#[tokio::test]
async fn unique_login_is_enforced_by_the_database() -> Result<()> {
    let Some(uri) = database_uri() else { return Ok(()) };
    let pool = connect(&uri, 2)?;
    ensure_schema(&pool).await?;
    let users = PgCredentialStore::new(pool);

    let name = login("pg-dup");
    let first = users.create_user(&name, "h1").await?;
    assert!(matches!(users.create_user(&name, "h2").await, Err(StoreError::DuplicateLogin)));
    assert_eq!(users.get_user_by_login(&name).await?.id, first.id);
    assert!(matches!(users.get_user(u64::MAX >> 1).await, Err(StoreError::UserNotFound)));
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_removes_their_entries() -> Result<()> {
    let Some(uri) = database_uri() else { return Ok(()) };
    let pool = connect(&uri, 2)?;
    ensure_schema(&pool).await?;
    let users = PgCredentialStore::new(pool.clone());
    let vaults = PgVaultStore::new(pool);

    let owner = users.create_user(&login("pg-gone"), "h").await?;
    let other = users.create_user(&login("pg-stays"), "h").await?;
    let a = vaults.create(owner.id, "a", b"1").await?;
    let b = vaults.create(owner.id, "b", b"2").await?;
    let kept = vaults.create(other.id, "c", b"3").await?;

    users.delete_user(owner.id).await?;
    assert!(matches!(users.get_user(owner.id).await, Err(StoreError::UserNotFound)));
    assert!(matches!(vaults.get(a.id).await, Err(StoreError::VaultNotFound)));
    assert!(matches!(vaults.get(b.id).await, Err(StoreError::VaultNotFound)));
    assert_eq!(vaults.get(kept.id).await?.value, b"3");
    assert!(matches!(users.delete_user(owner.id).await, Err(StoreError::UserNotFound)));
    Ok(())
}
