//! Persisted tier of the session cache.

use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage area cannot be opened at all, e.g. disabled by the
    /// browser or the embedding context.
    #[error("session storage is unavailable")]
    Unavailable,
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A fallible key-value area holding the persisted session record.
///
/// The cache treats every error here as "tier unavailable" and keeps
/// serving from memory, so implementations are free to fail on quota,
/// a disabled backend, or anything else.
pub trait SessionStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Infallible in-memory store.
///
/// The persisted tier outside the browser; page-session lifetime
/// collapses to process lifetime. Sharing one store between two caches
/// models two execution contexts over the same storage area.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Browser `sessionStorage`: per-origin, per-tab-group, dropped when the
/// backing browsing context ends.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Default)]
pub struct BrowserStore;

#[cfg(target_arch = "wasm32")]
impl BrowserStore {
    pub fn new() -> Self {
        Self
    }

    /// The storage area is re-resolved on every call; availability can
    /// change at runtime (e.g. the user flips a privacy setting).
    fn area(&self) -> Result<web_sys::Storage, StorageError> {
        web_sys::window()
            .ok_or(StorageError::Unavailable)?
            .session_storage()
            .map_err(|e| StorageError::Backend(format!("{e:?}")))?
            .ok_or(StorageError::Unavailable)
    }
}

#[cfg(target_arch = "wasm32")]
impl SessionStore for BrowserStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.area()?
            .get_item(key)
            .map_err(|e| StorageError::Backend(format!("{e:?}")))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.area()?
            .set_item(key, value)
            .map_err(|e| StorageError::Backend(format!("{e:?}")))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.area()?
            .remove_item(key)
            .map_err(|e| StorageError::Backend(format!("{e:?}")))
    }
}
