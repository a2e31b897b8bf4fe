//! The auth client: credentialed transport, CSRF header injection, and
//! session load/refresh against the auth endpoints.

use std::rc::Rc;

use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use crate::AuthUser;
use crate::cache::SessionCache;
use crate::csrf::{CsrfTokenBroker, TokenAcquisitionError};
use crate::storage::SessionStore;
use crate::time::TimeSource;

/// Header carrying the CSRF token on state-mutating requests.
///
/// Header names are case-insensitive on the wire; the constant is public
/// so callers building requests by hand can mirror it.
pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";

#[derive(Debug, thiserror::Error)]
pub enum AuthFetchError {
    #[error(transparent)]
    Token(#[from] TokenAcquisitionError),
    /// The acquired token contains bytes that cannot appear in a header.
    #[error("csrf token is not a valid header value")]
    InvalidToken,
    #[error("Network error. Please check your connection.")]
    Network(#[from] reqwest::Error),
}

/// The user field is absent when the server recognizes the request but
/// holds no session for it.
#[derive(Deserialize)]
struct SessionResponse {
    user: Option<AuthUser>,
}

/// Client for the authentication endpoints.
///
/// Owns the CSRF broker and the session cache. Construct one per
/// application context and share it; all methods take `&self`.
pub struct AuthClient {
    pub address: String,
    pub inner_client: reqwest::Client,
    pub csrf: CsrfTokenBroker,
    pub session_cache: SessionCache,
}

/// Construction and request plumbing
impl AuthClient {
    pub fn new(
        address: String,
        inner_client: reqwest::Client,
        store: Rc<dyn SessionStore>,
        time_source: TimeSource,
    ) -> Self {
        let csrf =
            CsrfTokenBroker::new(inner_client.clone(), address.clone());
        let session_cache = SessionCache::new(store, time_source);
        Self {
            address,
            inner_client,
            csrf,
            session_cache,
        }
    }

    /// Client wired for the browser: `sessionStorage` persistence and the
    /// system clock.
    #[cfg(all(target_arch = "wasm32", not(feature = "mock-time")))]
    pub fn browser(address: String) -> Self {
        Self::new(
            address,
            reqwest::Client::new(),
            Rc::new(crate::storage::BrowserStore::new()),
            TimeSource::new(),
        )
    }

    fn format_url(&self, path: &str) -> String {
        format!("{}/api/{path}", &self.address)
    }

    /// Start a request against the API, for use with
    /// [`AuthClient::authenticated_fetch`].
    pub fn request(
        &self,
        method: Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.inner_client.request(method, self.format_url(path))
    }
}

/// Authenticated fetch: CSRF header over credentialed transport
impl AuthClient {
    /// Send `request` with the CSRF token attached.
    ///
    /// The token header is only injected when the caller has not set it
    /// explicitly. No retry happens here: a caller that detects a CSRF
    /// rejection invalidates the broker and calls again with
    /// `force_refresh_token` set.
    pub async fn authenticated_fetch(
        &self,
        request: reqwest::RequestBuilder,
        force_refresh_token: bool,
    ) -> Result<reqwest::Response, AuthFetchError> {
        let token = self.csrf.token(force_refresh_token).await?;

        #[cfg(target_arch = "wasm32")]
        let request = request.fetch_credentials_include();

        let mut request = request.build()?;
        let headers = request.headers_mut();
        if !headers.contains_key(CSRF_TOKEN_HEADER) {
            let value = HeaderValue::from_str(&token)
                .map_err(|_| AuthFetchError::InvalidToken)?;
            headers.insert(CSRF_TOKEN_HEADER, value);
        }
        Ok(self.inner_client.execute(request).await?)
    }
}

/// Session load and refresh
impl AuthClient {
    /// The current user, serving from cache when it holds a live entry.
    pub async fn session(&self) -> Option<AuthUser> {
        if let Some(user) = self.session_cache.get() {
            return Some(user);
        }
        self.load_session().await
    }

    /// Fetch the authoritative session and update the cache.
    ///
    /// A 401 is the server saying "no session", as is a success response
    /// without a user payload: both clear the cache. Any other failure is
    /// transient and leaves the cache alone, so a flaky network call
    /// cannot evict a still-valid session.
    pub async fn load_session(&self) -> Option<AuthUser> {
        let request = self
            .inner_client
            .get(self.format_url("auth/session"))
            .header(ACCEPT, "application/json");

        #[cfg(target_arch = "wasm32")]
        let request = request.fetch_credentials_include();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("session request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.session_cache.clear();
            return None;
        }
        if !status.is_success() {
            tracing::warn!("session endpoint returned {status}");
            return None;
        }

        match response.json::<SessionResponse>().await {
            Ok(SessionResponse { user: Some(user) }) => {
                self.session_cache.set(user.clone());
                Some(user)
            }
            Ok(SessionResponse { user: None }) => {
                self.session_cache.clear();
                None
            }
            Err(e) => {
                tracing::warn!("session response failed to decode: {e}");
                None
            }
        }
    }

    /// Drop the cached session and reload from the server.
    ///
    /// The clear happens before the fetch starts, so readers observe the
    /// forced round-trip's result rather than the stale entry.
    pub async fn refresh_session(&self) -> Option<AuthUser> {
        self.session_cache.clear();
        self.load_session().await
    }
}
