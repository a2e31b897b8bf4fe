//! CSRF token acquisition with request coalescing.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;

/// Failure to obtain a CSRF token.
///
/// Cloneable so every caller joined on a coalesced acquisition receives
/// the same settled outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenAcquisitionError {
    /// The endpoint answered with a non-success status.
    #[error("csrf endpoint returned {0}")]
    Endpoint(StatusCode),
    /// The response decoded but carried no token.
    #[error("csrf response is missing the token field")]
    MissingToken,
    #[error("Network error. Please check your connection.")]
    Network(#[source] Arc<reqwest::Error>),
}

impl From<reqwest::Error> for TokenAcquisitionError {
    fn from(e: reqwest::Error) -> Self {
        TokenAcquisitionError::Network(Arc::new(e))
    }
}

type TokenResult = Result<String, TokenAcquisitionError>;
type SharedAcquisition = Shared<LocalBoxFuture<'static, TokenResult>>;

#[derive(Deserialize)]
struct CsrfTokenResponse {
    #[serde(rename = "csrfToken")]
    csrf_token: Option<String>,
}

/// Acquires and memoizes the CSRF token for state-mutating requests.
///
/// Holds at most one live token and at most one in-flight acquisition.
/// Callers that arrive while a request is in flight join it instead of
/// issuing their own, so N concurrent callers produce exactly one
/// network call and observe the same outcome.
#[derive(Clone)]
pub struct CsrfTokenBroker {
    inner: Rc<BrokerInner>,
}

struct BrokerInner {
    client: reqwest::Client,
    address: String,
    token: RefCell<Option<String>>,
    /// The in-flight acquisition, tagged with a generation id so a stale
    /// settlement cannot free a slot a forced refresh has since taken.
    in_flight: RefCell<Option<(u64, SharedAcquisition)>>,
    generation: Cell<u64>,
}

impl CsrfTokenBroker {
    pub fn new(client: reqwest::Client, address: String) -> Self {
        Self {
            inner: Rc::new(BrokerInner {
                client,
                address,
                token: RefCell::new(None),
                in_flight: RefCell::new(None),
                generation: Cell::new(0),
            }),
        }
    }

    /// The current token, acquiring one if needed.
    ///
    /// `force_refresh` bypasses both the memoized token and any in-flight
    /// acquisition and starts a fresh request; use it after a request has
    /// proven the token stale.
    pub async fn token(&self, force_refresh: bool) -> TokenResult {
        if !force_refresh {
            if let Some(token) = self.inner.token.borrow().clone() {
                return Ok(token);
            }
            let pending = self
                .inner
                .in_flight
                .borrow()
                .as_ref()
                .map(|(_, acquisition)| acquisition.clone());
            if let Some(acquisition) = pending {
                return acquisition.await;
            }
        }
        self.begin_acquisition().await
    }

    /// Drop the memoized token.
    ///
    /// An in-flight acquisition is not cancelled and still populates the
    /// memoized slot when it resolves; callers wanting a token newer than
    /// the invalidated one should await [`CsrfTokenBroker::token`] rather
    /// than assume the slot is already current.
    pub fn invalidate(&self) {
        *self.inner.token.borrow_mut() = None;
    }

    fn begin_acquisition(&self) -> SharedAcquisition {
        let id = self.inner.generation.get();
        self.inner.generation.set(id + 1);

        let inner = Rc::clone(&self.inner);
        let acquisition = async move {
            let result = fetch_token(&inner.client, &inner.address).await;
            if let Ok(token) = &result {
                *inner.token.borrow_mut() = Some(token.clone());
            }
            // Free the slot so the next call starts fresh, unless a
            // forced refresh already replaced this acquisition.
            let mut slot = inner.in_flight.borrow_mut();
            if slot.as_ref().is_some_and(|(slot_id, _)| *slot_id == id) {
                *slot = None;
            }
            result
        }
        .boxed_local()
        .shared();

        *self.inner.in_flight.borrow_mut() =
            Some((id, acquisition.clone()));
        acquisition
    }
}

async fn fetch_token(client: &reqwest::Client, address: &str) -> TokenResult {
    let request = client
        .get(format!("{address}/api/auth/csrf"))
        .header(ACCEPT, "application/json");

    #[cfg(target_arch = "wasm32")]
    let request = request.fetch_credentials_include();

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(TokenAcquisitionError::Endpoint(response.status()));
    }
    let body: CsrfTokenResponse = response.json().await?;
    body.csrf_token.ok_or(TokenAcquisitionError::MissingToken)
}
