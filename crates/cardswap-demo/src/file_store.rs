//! File-backed secure store.
//!
//! Each entry lives at `<root>/<service>/<account>`, written atomically and
//! readable only by the owner on Unix. This is not a hardware keystore; it
//! exists so the demo keeps the same identity across runs.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use cardswap_core::{SecureStore, StoreError};

pub struct FileSecureStore {
    root: PathBuf,
}

impl FileSecureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data directory for the demo, if one can be determined.
    pub fn default_root() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "cardswap", "cardswap-demo")
            .map(|dirs| dirs.data_dir().join("secure-store"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, account: &str, service: &str) -> Result<PathBuf, String> {
        check_component(service)?;
        check_component(account)?;
        Ok(self.root.join(service).join(account))
    }
}

/// Names become path components; keep them to a safe alphabet.
fn check_component(name: &str) -> Result<(), String> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(format!("invalid store name {name:?}"))
    }
}

impl SecureStore for FileSecureStore {
    fn save(&self, bytes: &[u8], account: &str, service: &str) -> Result<(), StoreError> {
        let path = self
            .entry_path(account, service)
            .map_err(StoreError::WriteFailed)?;
        let write_failed = |e: std::io::Error| StoreError::WriteFailed(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(write_failed)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_failed)?;
        }
        file.write_all(bytes).map_err(write_failed)?;
        file.sync_all().map_err(write_failed)?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(write_failed)?;
        Ok(())
    }

    fn load(&self, account: &str, service: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self
            .entry_path(account, service)
            .map_err(StoreError::Unreadable)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unreadable(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cardswap_core::IdentityKeyStore;

    #[test]
    fn test_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path());
        assert_eq!(store.load("signing-key", "svc").unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path());

        store.save(b"first", "acct", "svc").unwrap();
        store.save(b"second", "acct", "svc").unwrap();
        assert_eq!(store.load("acct", "svc").unwrap(), Some(b"second".to_vec()));
        assert!(!dir.path().join("svc").join("acct.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path());
        store.save(b"secret", "acct", "svc").unwrap();

        let mode = fs::metadata(dir.path().join("svc").join("acct"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path());

        assert!(matches!(
            store.save(b"x", "../escape", "svc"),
            Err(StoreError::WriteFailed(_))
        ));
        assert!(matches!(
            store.load("acct", ".."),
            Err(StoreError::Unreadable(_))
        ));
    }

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let first = IdentityKeyStore::new(Arc::new(FileSecureStore::new(dir.path())));
        let (id1, keys1) = first.load_or_create().unwrap();

        let second = IdentityKeyStore::new(Arc::new(FileSecureStore::new(dir.path())));
        let (id2, keys2) = second.load_or_create().unwrap();

        assert_eq!(id1, id2);
        assert_eq!(keys1.fingerprint(), keys2.fingerprint());
    }
}
