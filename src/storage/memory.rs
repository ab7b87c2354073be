use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{CredentialStore, HealthCheck, StoreError, User, VaultEntry, VaultStore};

/// In-memory credential store. Ids start at 1 like a fresh BIGSERIAL.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<u64, User>>,
    next_id: AtomicU64,
    vaults: Option<Arc<MemoryVaultStore>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }

    /// Store whose `delete_user` also removes the user's entries from `vaults`.
    pub fn with_vaults(vaults: Arc<MemoryVaultStore>) -> Self {
        Self { vaults: Some(vaults), ..Self::default() }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_user(&self, id: u64) -> Result<User, StoreError> {
        self.users.read().get(&id).cloned().ok_or(StoreError::UserNotFound)
    }

    async fn get_user_by_login(&self, login: &str) -> Result<User, StoreError> {
        self.users
            .read()
            .values()
            .find(|u| u.login == login)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        // Check and insert under one write lock, the way a UNIQUE constraint would
        let mut users = self.users.write();
        if users.values().any(|u| u.login == login) {
            return Err(StoreError::DuplicateLogin);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User { id, login: login.to_string(), password_hash: password_hash.to_string() };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.login == user.login && u.id != user.id) {
            return Err(StoreError::DuplicateLogin);
        }
        match users.get_mut(&user.id) {
            Some(slot) => { *slot = user.clone(); Ok(()) }
            None => Err(StoreError::UserNotFound),
        }
    }

    async fn delete_user(&self, id: u64) -> Result<(), StoreError> {
        let mut users = self.users.write();
        if !users.contains_key(&id) {
            return Err(StoreError::UserNotFound);
        }
        if let Some(vaults) = &self.vaults {
            vaults.delete_owned_by(id);
        }
        users.remove(&id);
        Ok(())
    }
}

/// Steps of a vault write where `MemoryVaultStore::fail_next` can abort the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Payload allocated, metadata row staged, nothing streamed yet.
    AfterRowWrite,
    /// Part of the payload has been streamed.
    DuringPayloadWrite,
    /// Everything staged; the commit itself fails.
    Commit,
}

#[derive(Debug, Clone)]
struct Row {
    key: String,
    payload: u32,
    owner_id: u64,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<u64, Row>,
    payloads: HashMap<u32, Vec<u8>>,
}

/// Writes staged by one transaction; dropping it without `commit` is a rollback.
#[derive(Default)]
struct Staged {
    rows: Vec<(u64, Row)>,
    payloads: Vec<(u32, Vec<u8>)>,
    /// Staged rows overwrite existing ones and release the payload they hold at commit.
    replace: bool,
}

/// In-memory vault store that mirrors the transactional large-object layout:
/// a metadata row references a payload slot, both published atomically.
pub struct MemoryVaultStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    next_oid: AtomicU32,
    chunk_size: usize,
    fault: Mutex<Option<FaultPoint>>,
}

impl Default for MemoryVaultStore {
    fn default() -> Self { Self::new() }
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(0),
            next_oid: AtomicU32::new(16384),
            chunk_size: 64 * 1024,
            fault: Mutex::new(None),
        }
    }

    /// Make the next vault write that reaches `point` fail and roll back.
    pub fn fail_next(&self, point: FaultPoint) {
        *self.fault.lock() = Some(point);
    }

    pub fn row_count(&self) -> usize { self.tables.read().rows.len() }

    /// Number of payload slots still held, referenced or not.
    pub fn payload_count(&self) -> usize { self.tables.read().payloads.len() }

    fn trip(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut fault = self.fault.lock();
        if *fault == Some(point) {
            *fault = None;
            return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn stream_into(&self, buf: &mut Vec<u8>, value: &[u8]) -> Result<(), StoreError> {
        for (i, chunk) in value.chunks(self.chunk_size).enumerate() {
            buf.extend_from_slice(chunk);
            if i == 0 { self.trip(FaultPoint::DuringPayloadWrite)?; }
        }
        if value.is_empty() { self.trip(FaultPoint::DuringPayloadWrite)?; }
        Ok(())
    }

    fn commit(&self, mut staged: Staged) -> Result<(), StoreError> {
        self.trip(FaultPoint::Commit)?;
        let mut tables = self.tables.write();

        // Replaced rows are resolved against the tables as they are now, under the write lock
        let mut released = Vec::new();
        if staged.replace {
            for (id, row) in staged.rows.iter_mut() {
                let current = tables.rows.get(id).ok_or(StoreError::VaultNotFound)?;
                released.push(current.payload);
                row.owner_id = current.owner_id;
            }
        }

        for (oid, bytes) in staged.payloads { tables.payloads.insert(oid, bytes); }
        for (id, row) in staged.rows { tables.rows.insert(id, row); }
        for oid in released { tables.payloads.remove(&oid); }
        Ok(())
    }

    fn stage_update(&self, entry: &VaultEntry) -> Result<Staged, StoreError> {
        if !self.tables.read().rows.contains_key(&entry.id) {
            return Err(StoreError::VaultNotFound);
        }
        let mut staged = Staged { replace: true, ..Staged::default() };
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        staged.rows.push((entry.id, Row { key: entry.key.clone(), payload: oid, owner_id: 0 }));
        self.trip(FaultPoint::AfterRowWrite)?;

        let mut payload = Vec::with_capacity(entry.value.len());
        self.stream_into(&mut payload, &entry.value)?;
        staged.payloads.push((oid, payload));
        Ok(staged)
    }

    /// Remove every entry owned by `owner_id` with its payload; returns how many went.
    pub fn delete_owned_by(&self, owner_id: u64) -> usize {
        let mut tables = self.tables.write();
        let ids: Vec<u64> = tables.rows.iter().filter(|(_, r)| r.owner_id == owner_id).map(|(id, _)| *id).collect();
        for id in &ids {
            if let Some(row) = tables.rows.remove(id) {
                tables.payloads.remove(&row.payload);
            }
        }
        ids.len()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn create(&self, owner_id: u64, key: &str, value: &[u8]) -> Result<VaultEntry, StoreError> {
        let mut staged = Staged::default();
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        // Ids are consumed even on rollback, as with a sequence
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        staged.rows.push((id, Row { key: key.to_string(), payload: oid, owner_id }));
        self.trip(FaultPoint::AfterRowWrite)?;

        let mut payload = Vec::with_capacity(value.len());
        self.stream_into(&mut payload, value)?;
        staged.payloads.push((oid, payload));

        self.commit(staged)?;
        Ok(VaultEntry { id, key: key.to_string(), value: value.to_vec(), owner_id })
    }

    async fn get(&self, id: u64) -> Result<VaultEntry, StoreError> {
        let tables = self.tables.read();
        let row = tables.rows.get(&id).ok_or(StoreError::VaultNotFound)?;
        let value = tables
            .payloads
            .get(&row.payload)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("payload {} for vault {} is missing", row.payload, id)))?;
        Ok(VaultEntry { id, key: row.key.clone(), value, owner_id: row.owner_id })
    }

    async fn update(&self, entry: &VaultEntry) -> Result<(), StoreError> {
        let staged = self.stage_update(entry)?;
        self.commit(staged)
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let row = tables.rows.remove(&id).ok_or(StoreError::VaultNotFound)?;
        tables.payloads.remove(&row.payload);
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for MemoryVaultStore {
    async fn ping(&self) -> Result<(), StoreError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryVaultStore::new();
        let created = store.create(7, "k", b"v").await.unwrap();
        assert_eq!(created.id, 1);
        let got = store.get(created.id).await.unwrap();
        assert_eq!(got, VaultEntry { id: 1, key: "k".into(), value: b"v".to_vec(), owner_id: 7 });
    }

    #[tokio::test]
    async fn large_values_span_many_chunks() {
        let store = MemoryVaultStore::new();
        let value: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let created = store.create(1, "blob", &value).await.unwrap();
        assert_eq!(store.get(created.id).await.unwrap().value, value);
    }

    #[tokio::test]
    async fn failure_at_any_step_leaves_nothing_visible() {
        for point in [FaultPoint::AfterRowWrite, FaultPoint::DuringPayloadWrite, FaultPoint::Commit] {
            let store = MemoryVaultStore::new();
            store.fail_next(point);
            let err = store.create(1, "k", b"value").await.unwrap_err();
            assert!(matches!(err, StoreError::Unavailable(_)), "{:?}", point);
            assert_eq!(store.row_count(), 0, "dangling row after {:?}", point);
            assert_eq!(store.payload_count(), 0, "orphan payload after {:?}", point);
            assert!(matches!(store.get(1).await, Err(StoreError::VaultNotFound)));
        }
    }

    #[tokio::test]
    async fn failed_update_keeps_previous_value() {
        let store = MemoryVaultStore::new();
        let mut entry = store.create(1, "k", b"old").await.unwrap();
        entry.value = b"new".to_vec();
        store.fail_next(FaultPoint::DuringPayloadWrite);
        assert!(store.update(&entry).await.is_err());
        assert_eq!(store.get(entry.id).await.unwrap().value, b"old");
        assert_eq!(store.payload_count(), 1);
    }

    #[tokio::test]
    async fn update_replaces_payload_and_keeps_owner() {
        let store = MemoryVaultStore::new();
        let created = store.create(3, "k", b"v1").await.unwrap();
        let changed = VaultEntry { id: created.id, key: "k2".into(), value: b"v2".to_vec(), owner_id: 99 };
        store.update(&changed).await.unwrap();
        let got = store.get(created.id).await.unwrap();
        assert_eq!(got.key, "k2");
        assert_eq!(got.value, b"v2");
        assert_eq!(got.owner_id, 3);
        assert_eq!(store.payload_count(), 1, "previous payload must be released");
    }

    #[tokio::test]
    async fn delete_releases_row_and_payload() {
        let store = MemoryVaultStore::new();
        let created = store.create(1, "k", b"v").await.unwrap();
        store.delete(created.id).await.unwrap();
        assert_eq!(store.row_count(), 0);
        assert_eq!(store.payload_count(), 0);
        assert!(matches!(store.delete(created.id).await, Err(StoreError::VaultNotFound)));
        assert!(matches!(store.update(&created).await, Err(StoreError::VaultNotFound)));
    }

    #[tokio::test]
    async fn update_racing_delete_does_not_resurrect_the_row() {
        let store = MemoryVaultStore::new();
        let created = store.create(1, "k", b"v").await.unwrap();
        let staged = store.stage_update(&VaultEntry { value: b"v2".to_vec(), ..created.clone() }).unwrap();
        store.delete(created.id).await.unwrap();
        assert!(matches!(store.commit(staged), Err(StoreError::VaultNotFound)));
        assert_eq!(store.row_count(), 0);
        assert_eq!(store.payload_count(), 0);
    }

    #[tokio::test]
    async fn interleaved_updates_keep_exactly_one_payload() {
        let store = MemoryVaultStore::new();
        let created = store.create(1, "k", b"v").await.unwrap();
        let first = store.stage_update(&VaultEntry { value: b"a".to_vec(), ..created.clone() }).unwrap();
        let second = store.stage_update(&VaultEntry { value: b"b".to_vec(), ..created.clone() }).unwrap();
        store.commit(first).unwrap();
        store.commit(second).unwrap();
        assert_eq!(store.get(created.id).await.unwrap().value, b"b");
        assert_eq!(store.payload_count(), 1);
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_entries() {
        let vaults = Arc::new(MemoryVaultStore::new());
        let users = MemoryCredentialStore::with_vaults(vaults.clone());
        let owner = users.create_user("owner", "h").await.unwrap();
        let other = users.create_user("other", "h").await.unwrap();
        vaults.create(owner.id, "a", b"1").await.unwrap();
        vaults.create(owner.id, "b", b"2").await.unwrap();
        let kept = vaults.create(other.id, "c", b"3").await.unwrap();

        users.delete_user(owner.id).await.unwrap();
        assert!(matches!(users.get_user(owner.id).await, Err(StoreError::UserNotFound)));
        assert_eq!(vaults.row_count(), 1);
        assert_eq!(vaults.payload_count(), 1);
        assert_eq!(vaults.get(kept.id).await.unwrap().value, b"3");
        assert!(matches!(users.delete_user(owner.id).await, Err(StoreError::UserNotFound)));
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let users = MemoryCredentialStore::new();
        let first = users.create_user("test", "h1").await.unwrap();
        assert_eq!(first.id, 1);
        assert!(matches!(users.create_user("test", "h2").await, Err(StoreError::DuplicateLogin)));
        assert_eq!(users.get_user_by_login("test").await.unwrap().password_hash, "h1");
    }

    #[tokio::test]
    async fn user_update_and_delete() {
        let users = MemoryCredentialStore::new();
        let mut u = users.create_user("k1", "v1").await.unwrap();
        users.create_user("k2", "v2").await.unwrap();
        u.password_hash = "v3".into();
        users.update_user(&u).await.unwrap();
        assert_eq!(users.get_user(u.id).await.unwrap().password_hash, "v3");
        u.login = "k2".into();
        assert!(matches!(users.update_user(&u).await, Err(StoreError::DuplicateLogin)));
        users.delete_user(u.id).await.unwrap();
        assert!(matches!(users.get_user(u.id).await, Err(StoreError::UserNotFound)));
    }
}
