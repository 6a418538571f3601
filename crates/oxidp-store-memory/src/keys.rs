//! Key storage backends.
//!
//! [`InMemoryKeyStorage`] for tests; [`FileKeyStorage`] persists the key set
//! as one JSON document so signing material survives process restart. The
//! file is written atomically (temp file + rename) and created with owner-only
//! permissions on Unix.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use oxidp_auth::error::{AuthError, AuthResult};
use oxidp_auth::keys::{KeyRecord, KeyStorage};

/// Volatile key storage.
#[derive(Default)]
pub struct InMemoryKeyStorage {
    records: DashMap<String, KeyRecord>,
}

#[async_trait]
impl KeyStorage for InMemoryKeyStorage {
    async fn load_all(&self) -> AuthResult<Vec<KeyRecord>> {
        Ok(self.records.iter().map(|entry| entry.clone()).collect())
    }

    async fn put(&self, record: &KeyRecord) -> AuthResult<()> {
        self.records.insert(record.kid.clone(), record.clone());
        Ok(())
    }
}

/// File-backed key storage.
pub struct FileKeyStorage {
    path: PathBuf,
    // Serializes writers; the whole document is rewritten per put.
    write_lock: Mutex<()>,
}

impl FileKeyStorage {
    /// Creates storage over the given path. The parent directory must exist.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_document(&self) -> AuthResult<HashMap<String, KeyRecord>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AuthError::storage(format!("key file corrupt: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(AuthError::storage(format!("key file read: {e}"))),
        }
    }

    fn write_document(&self, document: &HashMap<String, KeyRecord>) -> AuthResult<()> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| AuthError::storage(format!("key file encoding: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)
            .map_err(|e| AuthError::storage(format!("key file write: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AuthError::storage(format!("key file rename: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl KeyStorage for FileKeyStorage {
    async fn load_all(&self) -> AuthResult<Vec<KeyRecord>> {
        let document = self.read_document()?;
        debug!(keys = document.len(), path = %self.path.display(), "loaded signing keys");
        Ok(document.into_values().collect())
    }

    async fn put(&self, record: &KeyRecord) -> AuthResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuthError::storage("key file lock poisoned"))?;
        let mut document = self.read_document()?;
        document.insert(record.kid.clone(), record.clone());
        self.write_document(&document)
    }
}
