//! Key-value session store.
//!
//! Backends implement the object-safe [`SessionStore`] over raw JSON
//! strings; callers use the typed [`SessionStoreExt::get`] /
//! [`SessionStoreExt::set`] helpers, available on every store including
//! `dyn SessionStore`.

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, PersistenceResult};

/// Raw string-keyed store.
pub trait SessionStore: Send + Sync {
    fn get_raw(&self, key: &str) -> PersistenceResult<Option<String>>;

    fn set_raw(&self, key: &str, value: String) -> PersistenceResult<()>;

    fn remove(&self, key: &str) -> PersistenceResult<()>;

    /// All keys currently present.
    fn keys(&self) -> PersistenceResult<Vec<String>>;
}

/// Typed access on top of [`SessionStore`].
pub trait SessionStoreExt: SessionStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> PersistenceResult<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| PersistenceError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> PersistenceResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw)
    }

    /// Read `key`, treating absent or unreadable values as `T::default()`.
    fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key, error = %e, "Unreadable stored value, using default");
                T::default()
            }
        }
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get_raw(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> PersistenceResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistenceResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> PersistenceResult<Vec<String>> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// One `<key>.json` file per key under a base directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug)]
pub struct JsonFileStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    const EXTENSION: &'static str = "json";

    /// Open (and create if needed) a store rooted at `base_dir`.
    pub fn open(base_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        info!(dir = %base_dir.display(), "Opened session store");
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PersistenceResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(format!("{key}.{}", Self::EXTENSION)))
    }
}

impl SessionStore for JsonFileStore {
    fn get_raw(&self, key: &str) -> PersistenceResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_raw(&self, key: &str, value: String) -> PersistenceResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let _guard = self.write_lock.lock();
        fs::write(&tmp, value.as_bytes())?;
        fs::rename(&tmp, &path)?;
        debug!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistenceResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> PersistenceResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn exercise(store: &dyn SessionStore) {
        assert_eq!(store.get::<bool>("show_as_cr").unwrap(), None);

        store.set("show_as_cr", &true).unwrap();
        assert_eq!(store.get::<bool>("show_as_cr").unwrap(), Some(true));

        let mut accounts = BTreeMap::new();
        accounts.insert("CR1".to_string(), "tok-1".to_string());
        store.set("accountsList", &accounts).unwrap();
        let loaded: BTreeMap<String, String> = store.get("accountsList").unwrap().unwrap();
        assert_eq!(loaded, accounts);

        assert_eq!(
            store.keys().unwrap(),
            vec!["accountsList".to_string(), "show_as_cr".to_string()]
        );

        store.remove("show_as_cr").unwrap();
        store.remove("show_as_cr").unwrap();
        assert_eq!(store.get::<bool>("show_as_cr").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_json_file_store() {
        let dir = TempDir::new().unwrap();
        exercise(&JsonFileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store.set("active_loginid", "VRTC9").unwrap();
        }
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get::<String>("active_loginid").unwrap().as_deref(),
            Some("VRTC9")
        );
    }

    #[test]
    fn test_json_file_store_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", &1),
            Err(PersistenceError::InvalidKey(_))
        ));
        assert!(store.get::<u32>("").is_err());
    }

    #[test]
    fn test_corrupt_value_falls_back_to_default() {
        let store = MemoryStore::new();
        store.set_raw("copyTokensArray", "{not json".to_string()).unwrap();

        assert!(matches!(
            store.get::<Vec<String>>("copyTokensArray"),
            Err(PersistenceError::Json { .. })
        ));
        let tokens: Vec<String> = store.get_or_default("copyTokensArray");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_typed_access_through_arc_dyn() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        store.set("adminMirrorModeEnabled", &false).unwrap();
        assert_eq!(store.get::<bool>("adminMirrorModeEnabled").unwrap(), Some(false));
    }
}
