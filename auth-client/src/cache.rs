//! Two-tier cache for the current session, with TTL expiry at read time.

use std::cell::RefCell;
use std::rc::Rc;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::AuthUser;
use crate::storage::SessionStore;
use crate::time::TimeSource;

/// Key of the persisted session record. Versioned so a layout change
/// cannot misparse records written by an older deployment.
pub const SESSION_CACHE_KEY: &str = "auth_session_cache_v1";

/// How long a cached session is served before the next read goes back to
/// the server.
pub const SESSION_TTL: SignedDuration = SignedDuration::from_mins(5);

/// One cache entry: the user plus the instant it stops being served.
///
/// Also the persisted JSON layout (`{ "user": …, "expiresAt": <epoch
/// millis> }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    pub user: AuthUser,
    #[serde(with = "jiff::fmt::serde::timestamp::millisecond::required")]
    pub expires_at: Timestamp,
}

/// Read cache for the current authenticated user.
///
/// Two tiers: an in-memory slot and a persisted [`SessionStore`] that
/// survives a reload within the same page session. Writes go to both
/// tiers; reads prefer memory and repair it from a live persisted entry.
/// Expiry is evaluated on every read; there is no background eviction.
///
/// Persisted-tier failures are logged and degrade the cache to
/// memory-only operation. Persistence is an optimization, not a
/// correctness requirement for a single page session.
pub struct SessionCache {
    entry: RefCell<Option<CachedSession>>,
    store: Rc<dyn SessionStore>,
    time_source: TimeSource,
}

impl SessionCache {
    pub fn new(store: Rc<dyn SessionStore>, time_source: TimeSource) -> Self {
        Self {
            entry: RefCell::new(None),
            store,
            time_source,
        }
    }

    /// The cached user, if either tier holds a live entry.
    pub fn get(&self) -> Option<AuthUser> {
        let now = self.time_source.now();

        if let Some(entry) = self.entry.borrow().as_ref() {
            if now < entry.expires_at {
                return Some(entry.user.clone());
            }
        }

        // Memory is empty or expired; fall back to the persisted tier.
        if let Some(entry) = self.read_persisted() {
            if now < entry.expires_at {
                let user = entry.user.clone();
                *self.entry.borrow_mut() = Some(entry);
                return Some(user);
            }
        }

        // Nothing live anywhere. Clear both tiers so an expired persisted
        // record does not outlive this read.
        self.clear();
        None
    }

    /// Cache `user` in both tiers with a fresh TTL.
    pub fn set(&self, user: AuthUser) {
        let entry = CachedSession {
            user,
            expires_at: self.time_source.now() + SESSION_TTL,
        };
        match serde_json::to_string(&entry) {
            Ok(record) => {
                if let Err(e) = self.store.write(SESSION_CACHE_KEY, &record) {
                    tracing::warn!("failed to persist session cache: {e}");
                }
            }
            Err(e) => {
                tracing::warn!("failed to serialize session cache: {e}");
            }
        }
        *self.entry.borrow_mut() = Some(entry);
    }

    /// Drop the entry from both tiers. No suspension point between the
    /// two removals, so callers never observe one tier without the other.
    pub fn clear(&self) {
        *self.entry.borrow_mut() = None;
        if let Err(e) = self.store.remove(SESSION_CACHE_KEY) {
            tracing::warn!("failed to clear persisted session cache: {e}");
        }
    }

    fn read_persisted(&self) -> Option<CachedSession> {
        let record = match self.store.read(SESSION_CACHE_KEY) {
            Ok(record) => record?,
            Err(e) => {
                tracing::warn!("failed to read persisted session cache: {e}");
                return None;
            }
        };
        match serde_json::from_str(&record) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("discarding corrupt session record: {e}");
                None
            }
        }
    }
}
