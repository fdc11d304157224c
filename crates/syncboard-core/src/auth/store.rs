use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;

/// Key holding the raw bearer token
pub const TOKEN_KEY: &str = "token";

/// Key holding the JSON-serialized identity record
pub const USER_KEY: &str = "user";

/// Keychain service name for `KeyringStore`
const SERVICE_NAME: &str = "syncboard";

/// String-keyed persistence that survives process restarts.
///
/// Absence is modeled by removal: `remove` deletes the entry so a later
/// `get` returns `None`, and removing a missing key succeeds.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.entry_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read store entry: {}", key)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create store directory")?;
        std::fs::write(self.entry_path(key), value)
            .with_context(|| format!("Failed to write store entry: {}", key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove store entry: {}", key)),
        }
    }
}

/// Entries in the OS keychain, one keychain item per key.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve entry from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store entry in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete entry from keychain"),
        }
    }
}

/// Process-local store. Nothing survives a restart of the process, but a
/// restart simulated by re-initializing against the same instance does.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);

        store.set(TOKEN_KEY, "tok123").unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("tok123"));

        store.remove(TOKEN_KEY).unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert!(!dir.path().join("nested").join(TOKEN_KEY).exists());
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(store.remove(USER_KEY).is_ok());
    }

    #[test]
    fn test_memory_store_overwrite() {
        let store = MemoryStore::new();
        store.set(USER_KEY, "{}").unwrap();
        store.set(USER_KEY, r#"{"id":1}"#).unwrap();
        assert_eq!(store.get(USER_KEY).unwrap().as_deref(), Some(r#"{"id":1}"#));
        store.remove(USER_KEY).unwrap();
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }
}
