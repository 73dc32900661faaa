//! Durable storage for the access/refresh token pair.
//!
//! `TokenStore` is infallible from the caller's side: when its backend
//! fails, it logs the failure and keeps the session in memory for the rest
//! of the process.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use keyring::Entry;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Token file suffix in cache directory: `<namespace>_tokens.json`
const TOKEN_FILE_SUFFIX: &str = "tokens.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt token file: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// The stored token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens must not end up in logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Synchronous string key-value persistence.
pub trait KeyValueBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write all entries. Backends that can do so write them in one step.
    fn write(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove keys; missing keys are not an error.
    fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;
}

impl<T: KeyValueBackend + ?Sized> KeyValueBackend for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).read(key)
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        (**self).write(entries)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        (**self).remove(keys)
    }
}

/// Process-local map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = self.entries();
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.entries();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// One JSON object on disk per namespace, so portals never rewrite each
/// other's file. Writes go through a uniquely named temp file (created
/// 0600) that is renamed over the target.
pub struct FileBackend {
    dir: PathBuf,
    file_name: String,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(dir: PathBuf, namespace: &str) -> Self {
        Self {
            dir,
            file_name: format!("{}_{}", namespace, TOKEN_FILE_SUFFIX),
            lock: Mutex::new(()),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load()?;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        self.persist(&map)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() != before {
            self.persist(&map)?;
        }
        Ok(())
    }
}

/// OS keychain, one entry per key.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match Entry::new(&self.service, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        write_each_or_remove(
            entries,
            |key, value| Ok(Entry::new(&self.service, key)?.set_password(value)?),
            |key| self.delete(key),
        )
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

/// Write entries one at a time. If any write fails, every key is removed
/// before the error is returned, so readers find no pair rather than a
/// mismatched one.
fn write_each_or_remove(
    entries: &[(&str, &str)],
    mut write_one: impl FnMut(&str, &str) -> Result<(), StorageError>,
    mut remove_one: impl FnMut(&str) -> Result<(), StorageError>,
) -> Result<(), StorageError> {
    for &(key, value) in entries {
        if let Err(e) = write_one(key, value) {
            for &(key, _) in entries {
                if let Err(remove_err) = remove_one(key) {
                    warn!(key = %key, error = %remove_err, "Could not remove token after failed write");
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

// ============================================================================
// Token Store
// ============================================================================

/// Namespaced, degrade-to-memory storage of the token pair.
pub struct TokenStore {
    access_key: String,
    refresh_key: String,
    backend: Box<dyn KeyValueBackend>,
    fallback: MemoryBackend,
    /// First backend failure; set once the store has gone memory-only.
    failure: Mutex<Option<String>>,
}

impl TokenStore {
    pub fn new(namespace: &str, backend: Box<dyn KeyValueBackend>) -> Self {
        Self {
            access_key: format!("{}_token", namespace),
            refresh_key: format!("{}_refresh_token", namespace),
            backend,
            fallback: MemoryBackend::new(),
            failure: Mutex::new(None),
        }
    }

    pub fn in_memory(namespace: &str) -> Self {
        Self::new(namespace, Box::new(MemoryBackend::new()))
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn refresh_key(&self) -> &str {
        &self.refresh_key
    }

    /// True once a backend failure has pushed this store into memory-only mode.
    pub fn is_degraded(&self) -> bool {
        self.lock_failure().is_some()
    }

    /// Description of the backend failure that degraded this store.
    pub fn failure(&self) -> Option<String> {
        self.lock_failure().clone()
    }

    fn lock_failure(&self) -> MutexGuard<'_, Option<String>> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> &dyn KeyValueBackend {
        if self.is_degraded() {
            &self.fallback
        } else {
            self.backend.as_ref()
        }
    }

    fn degrade(&self, op: &str, err: &StorageError) {
        let mut failure = self.lock_failure();
        if failure.is_none() {
            warn!(
                backend = self.backend.name(),
                op = op,
                error = %err,
                "Token storage failed, keeping session in memory only"
            );
            *failure = Some(err.to_string());
        }
    }

    /// The stored pair, or `None` if either half is missing.
    pub fn get(&self) -> Option<Credential> {
        let read = |backend: &dyn KeyValueBackend| -> Result<Option<Credential>, StorageError> {
            let access = backend.read(&self.access_key)?;
            let refresh = backend.read(&self.refresh_key)?;
            match (access, refresh) {
                (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => Ok(Some(Credential::new(a, r))),
                (None, None) => Ok(None),
                _ => {
                    debug!(namespace = %self.access_key, "Partial token pair treated as absent");
                    Ok(None)
                }
            }
        };

        match read(self.active()) {
            Ok(credential) => credential,
            Err(e) => {
                self.degrade("get", &e);
                read(&self.fallback).unwrap_or(None)
            }
        }
    }

    /// Overwrite both tokens.
    pub fn set(&self, access_token: &str, refresh_token: &str) {
        let entries = [
            (self.access_key.as_str(), access_token),
            (self.refresh_key.as_str(), refresh_token),
        ];
        if let Err(e) = self.active().write(&entries) {
            self.degrade("set", &e);
            // Memory writes cannot fail
            let _ = self.fallback.write(&entries);
        }
    }

    /// Remove both tokens. Idempotent.
    ///
    /// The durable backend is always tried, degraded or not: a pair left
    /// there would restore a logged-out session on the next load.
    pub fn clear(&self) {
        let keys = [self.access_key.as_str(), self.refresh_key.as_str()];
        if let Err(e) = self.backend.remove(&keys) {
            if self.is_degraded() {
                warn!(backend = self.backend.name(), error = %e, "Could not remove stored tokens");
            } else {
                self.degrade("clear", &e);
            }
        }
        let _ = self.fallback.remove(&keys);
    }
}

// ============================================================================
// Tests
// ============================================================================
