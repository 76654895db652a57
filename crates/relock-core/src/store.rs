//! Credential persistence, scoped per database identity.
//!
//! The host supplies a [`CredentialStore`] (a plain string key-value store,
//! typically the platform preference store). [`CredentialRepository`] layers
//! typed access on top of it via [`Key`]s and JSON serialization. There is
//! no migration logic: an absent value means "not configured".

use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

/// Identifies one database for persistence purposes.
///
/// Typically derived from the database file location by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseId(String);

impl DatabaseId {
    /// Creates an id from a host-chosen identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A typed name for a persisted value.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Defines a key.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The persisted name of the key.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Capability interface to the host's per-database key-value store.
pub trait CredentialStore: Send + Sync {
    /// Reads a value, `None` when absent.
    fn get(&self, database: &DatabaseId, name: &str) -> Option<String>;

    /// Writes a value, replacing any previous one.
    fn put(&self, database: &DatabaseId, name: &str, value: String);

    /// Removes a value. Removing an absent value is not an error.
    fn remove(&self, database: &DatabaseId, name: &str);
}

/// In-memory implementation of [`CredentialStore`], used by tests and as a
/// fallback when the host provides no persistent store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<(DatabaseId, String), String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, database: &DatabaseId, name: &str) -> Option<String> {
        self.entries
            .read()
            .get(&(database.clone(), name.to_string()))
            .cloned()
    }

    fn put(&self, database: &DatabaseId, name: &str, value: String) {
        self.entries
            .write()
            .insert((database.clone(), name.to_string()), value);
    }

    fn remove(&self, database: &DatabaseId, name: &str) {
        self.entries
            .write()
            .remove(&(database.clone(), name.to_string()));
    }
}

/// Typed access to a [`CredentialStore`].
#[derive(Clone)]
pub struct CredentialRepository {
    store: Arc<dyn CredentialStore>,
}

impl CredentialRepository {
    /// Wraps a host store.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Reads and deserializes a value.
    ///
    /// A value that fails to deserialize is treated as absent; the unlock
    /// flows degrade to "not configured" rather than failing.
    pub fn get<T: DeserializeOwned>(&self, database: &DatabaseId, key: &Key<T>) -> Option<T> {
        let raw = self.store.get(database, key.name())?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key = key.name(), %error, "failed to deserialize credential");
                None
            }
        }
    }

    /// Serializes and writes a value.
    pub fn put<T: Serialize>(&self, database: &DatabaseId, key: &Key<T>, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.put(database, key.name(), raw),
            Err(error) => {
                tracing::warn!(key = key.name(), %error, "failed to serialize credential");
            }
        }
    }

    /// Removes a value.
    pub fn remove<T>(&self, database: &DatabaseId, key: &Key<T>) {
        self.store.remove(database, key.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: Key<u32> = Key::new("counter");

    #[test]
    fn test_round_trips_typed_values() {
        let repo = CredentialRepository::new(Arc::new(MemoryCredentialStore::new()));
        let db = DatabaseId::new("db1");

        assert_eq!(repo.get(&db, &COUNTER), None);
        repo.put(&db, &COUNTER, &7);
        assert_eq!(repo.get(&db, &COUNTER), Some(7));
        repo.remove(&db, &COUNTER);
        assert_eq!(repo.get(&db, &COUNTER), None);
    }

    #[test]
    fn test_values_are_scoped_per_database() {
        let repo = CredentialRepository::new(Arc::new(MemoryCredentialStore::new()));
        repo.put(&DatabaseId::new("db1"), &COUNTER, &1);
        assert_eq!(repo.get(&DatabaseId::new("db2"), &COUNTER), None);
    }

    #[test]
    fn test_undeserializable_value_reads_as_absent() {
        let store = Arc::new(MemoryCredentialStore::new());
        let db = DatabaseId::new("db1");
        store.put(&db, COUNTER.name(), "not a number".to_string());

        let repo = CredentialRepository::new(store);
        assert_eq!(repo.get(&db, &COUNTER), None);
    }
}
