//! Flat key/value persistence for the schema store.
//!
//! State is written as four JSON documents under versioned keys. Loading is
//! forgiving: a missing key or a document that fails to parse falls back to
//! the built-in default for that key instead of failing.

use crate::error::PersistenceError;
use crate::schema::{ColumnPermissionMatrix, PermissionMatrix, Role, TableDefinition};
use log::{info, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Minimal string key/value store.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

/// Process-local store; contents vanish with the value.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: HashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct DirKv {
    root: PathBuf,
}

impl DirKv {
    /// Opens (creating if needed) a directory-backed store.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(DirKv { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for DirKv {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        // Replace atomically via rename
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Versioned storage keys derived from a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub schema: String,
    pub roles: String,
    pub permissions: String,
    pub column_permissions: String,
}

impl StorageKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        StorageKeys {
            schema: format!("{}_schema_v5", prefix),
            roles: format!("{}_roles_v1", prefix),
            permissions: format!("{}_perms_v1", prefix),
            column_permissions: format!("{}_col_perms_v1", prefix),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::with_prefix("livegrid")
    }
}

/// Everything the schema store persists.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub tables: Vec<TableDefinition>,
    pub roles: Vec<Role>,
    pub permissions: PermissionMatrix,
    pub column_permissions: ColumnPermissionMatrix,
}

impl PersistedState {
    /// Load each document independently, substituting the matching part of
    /// `fallback` for any that is missing or unreadable.
    pub fn load(
        kv: &dyn KeyValueStore,
        keys: &StorageKeys,
        fallback: impl FnOnce() -> PersistedState,
    ) -> PersistedState {
        let tables = load_safe::<Vec<TableDefinition>>(kv, &keys.schema);
        let roles = load_safe::<Vec<Role>>(kv, &keys.roles);
        let permissions = load_safe::<PermissionMatrix>(kv, &keys.permissions);
        let column_permissions = load_safe::<ColumnPermissionMatrix>(kv, &keys.column_permissions);

        if tables.is_some() && roles.is_some() && permissions.is_some() && column_permissions.is_some() {
            info!("Loaded persisted workspace state");
        } else {
            info!("Persisted state incomplete, filling gaps from the default dataset");
        }

        let defaults = fallback();
        PersistedState {
            tables: tables.unwrap_or(defaults.tables),
            roles: roles.unwrap_or(defaults.roles),
            permissions: permissions.unwrap_or(defaults.permissions),
            column_permissions: column_permissions.unwrap_or(defaults.column_permissions),
        }
    }

    pub fn borrowed(&self) -> StateRef<'_> {
        StateRef {
            tables: &self.tables,
            roles: &self.roles,
            permissions: &self.permissions,
            column_permissions: &self.column_permissions,
        }
    }

    pub fn save(&self, kv: &mut dyn KeyValueStore, keys: &StorageKeys) -> Result<(), PersistenceError> {
        self.borrowed().save(kv, keys)
    }
}

/// Borrowed view of the persisted parts, so saving never clones rows.
#[derive(Debug, Clone, Copy)]
pub struct StateRef<'a> {
    pub tables: &'a [TableDefinition],
    pub roles: &'a [Role],
    pub permissions: &'a PermissionMatrix,
    pub column_permissions: &'a ColumnPermissionMatrix,
}

impl StateRef<'_> {
    /// Write all four documents.
    pub fn save(&self, kv: &mut dyn KeyValueStore, keys: &StorageKeys) -> Result<(), PersistenceError> {
        kv.set(&keys.schema, &serde_json::to_string(self.tables)?)?;
        kv.set(&keys.roles, &serde_json::to_string(self.roles)?)?;
        kv.set(&keys.permissions, &serde_json::to_string(self.permissions)?)?;
        kv.set(
            &keys.column_permissions,
            &serde_json::to_string(self.column_permissions)?,
        )?;
        Ok(())
    }
}

fn load_safe<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match kv.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read '{}': {}", key, e);
            return None;
        }
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding unreadable '{}': {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PermissionRule;
    use tempfile::tempdir;

    fn sample_state() -> PersistedState {
        let mut permissions = PermissionMatrix::new();
        permissions
            .entry("worker".to_string())
            .or_default()
            .insert("projects".to_string(), PermissionRule::ALL);
        PersistedState {
            tables: vec![TableDefinition::new("projects", "Projects")],
            roles: vec![Role {
                id: "worker".to_string(),
                name: "Worker".to_string(),
                color: "#10b981".to_string(),
                description: None,
                is_system: false,
            }],
            permissions,
            column_permissions: ColumnPermissionMatrix::new(),
        }
    }

    fn empty_state() -> PersistedState {
        PersistedState {
            tables: vec![],
            roles: vec![],
            permissions: PermissionMatrix::new(),
            column_permissions: ColumnPermissionMatrix::new(),
        }
    }

    #[test]
    fn test_keys_with_prefix() {
        let keys = StorageKeys::with_prefix("site");
        assert_eq!(keys.schema, "site_schema_v5");
        assert_eq!(keys.roles, "site_roles_v1");
        assert_eq!(keys.permissions, "site_perms_v1");
        assert_eq!(keys.column_permissions, "site_col_perms_v1");
    }

    #[test]
    fn test_memory_save_then_load() {
        let mut kv = MemoryKv::new();
        let keys = StorageKeys::default();
        let state = sample_state();
        state.save(&mut kv, &keys).unwrap();
        assert_eq!(kv.len(), 4);

        let loaded = PersistedState::load(&kv, &keys, empty_state);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_missing_keys_fall_back() {
        let kv = MemoryKv::new();
        let loaded = PersistedState::load(&kv, &StorageKeys::default(), sample_state);
        assert_eq!(loaded, sample_state());
    }

    #[test]
    fn test_corrupt_document_falls_back_per_key() {
        let mut kv = MemoryKv::new();
        let keys = StorageKeys::default();
        empty_state().save(&mut kv, &keys).unwrap();
        kv.set(&keys.schema, "{not json").unwrap();
        kv.set(&keys.roles, "null").unwrap();

        let loaded = PersistedState::load(&kv, &keys, sample_state);
        assert_eq!(loaded.tables, sample_state().tables);
        assert_eq!(loaded.roles, sample_state().roles);
        assert!(loaded.permissions.is_empty());
    }

    #[test]
    fn test_dir_kv_roundtrip() {
        let dir = tempdir().unwrap();
        let mut kv = DirKv::open(dir.path().join("store")).unwrap();
        assert_eq!(kv.get("missing").unwrap(), None);

        kv.set("livegrid_roles_v1", "[]").unwrap();
        assert_eq!(kv.get("livegrid_roles_v1").unwrap().as_deref(), Some("[]"));

        kv.remove("livegrid_roles_v1").unwrap();
        assert_eq!(kv.get("livegrid_roles_v1").unwrap(), None);
        kv.remove("livegrid_roles_v1").unwrap();
    }

    #[test]
    fn test_dir_kv_survives_reopen() {
        let dir = tempdir().unwrap();
        let keys = StorageKeys::default();
        {
            let mut kv = DirKv::open(dir.path()).unwrap();
            sample_state().save(&mut kv, &keys).unwrap();
        }
        let kv = DirKv::open(dir.path()).unwrap();
        let loaded = PersistedState::load(&kv, &keys, empty_state);
        assert_eq!(loaded, sample_state());
    }
}
