use tracing::warn;

use super::Identity;
use crate::error::{AppError, AppResult};
use crate::storage::VaultEntry;

pub fn can_access(identity: &Identity, entry: &VaultEntry) -> bool {
    identity.user_id == entry.owner_id
}

/// Run on every fetched entry before it is read, changed or echoed back.
pub fn ensure_owner(identity: &Identity, entry: &VaultEntry) -> AppResult<()> {
    if can_access(identity, entry) {
        return Ok(());
    }
    warn!(target: "vault", vault_id = entry.id, owner_id = entry.owner_id, caller = identity.user_id, "access denied");
    Err(AppError::forbidden("access_denied", "access denied"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner_id: u64) -> VaultEntry {
        VaultEntry { id: 1, key: "k".into(), value: b"v".to_vec(), owner_id }
    }

    #[test]
    fn owner_passes_everyone_else_is_denied() {
        assert!(can_access(&Identity::new(3), &entry(3)));
        assert!(!can_access(&Identity::new(4), &entry(3)));
        assert!(ensure_owner(&Identity::new(3), &entry(3)).is_ok());
        let err = ensure_owner(&Identity::new(4), &entry(3)).unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.message(), "access denied");
    }
}
