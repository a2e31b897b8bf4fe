//! Client-side authentication utilities: CSRF token brokering, an
//! authenticated fetch wrapper, and a cached view of the current session.
//!
//! The crate targets wasm32 frontends but keeps all browser specifics
//! (session storage, credentialed fetch) behind `cfg(target_arch =
//! "wasm32")` or the [`SessionStore`] trait, so everything builds and
//! tests natively.
//!
//! All state is owned by explicitly constructed objects; there are no
//! process-wide singletons. The concurrency model is a single-threaded
//! event loop: shared state lives in `Rc`/`RefCell` and is only touched
//! between suspension points.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod client;
pub mod csrf;
pub mod storage;
pub mod time;

pub use cache::{CachedSession, SESSION_CACHE_KEY, SESSION_TTL, SessionCache};
pub use client::{AuthClient, AuthFetchError, CSRF_TOKEN_HEADER};
pub use csrf::{CsrfTokenBroker, TokenAcquisitionError};
pub use storage::{MemoryStore, SessionStore, StorageError};
pub use time::TimeSource;

#[cfg(target_arch = "wasm32")]
pub use storage::BrowserStore;

/// The authenticated identity as returned by the session endpoint.
///
/// An immutable value: the cache replaces it wholesale on every write and
/// never mutates individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}
