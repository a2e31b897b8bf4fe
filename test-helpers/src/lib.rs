//! Mock auth backend for integration tests.
//!
//! [`spawn_app`] binds an actix-web server on an OS-assigned port serving
//! the csrf and session endpoints plus two observation endpoints, and
//! returns a [`TestApp`] with a ready client. Each test switches the
//! backend's behavior through [`MockAuthState`].

use std::net::TcpListener;
use std::rc::Rc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::dev::HttpServiceFactory;
use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, get, post, web,
};
use auth_client::{
    AuthClient, AuthUser, CSRF_TOKEN_HEADER, MemoryStore, TimeSource,
};
use serde_json::json;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// What the session endpoint answers.
#[derive(Clone)]
pub enum SessionOutcome {
    /// 200 with `{ "user": … }`
    User(AuthUser),
    /// 200 with `{}`: recognized request, no session
    Empty,
    /// 401
    Unauthorized,
    /// 500
    ServerError,
}

/// What the csrf endpoint answers.
#[derive(Clone)]
pub enum CsrfOutcome {
    /// 200 with `{ "csrfToken": <served token> }`
    Token,
    /// 200 with `{}`
    MissingField,
    /// 500
    ServerError,
}

/// Shared, per-test-switchable state of the mock backend.
pub struct MockAuthState {
    csrf_hits: AtomicUsize,
    session_hits: AtomicUsize,
    served_token: Mutex<String>,
    csrf_outcome: Mutex<CsrfOutcome>,
    session_outcome: Mutex<SessionOutcome>,
}

impl Default for MockAuthState {
    fn default() -> Self {
        Self {
            csrf_hits: AtomicUsize::new(0),
            session_hits: AtomicUsize::new(0),
            served_token: Mutex::new("csrf-token-1".into()),
            csrf_outcome: Mutex::new(CsrfOutcome::Token),
            session_outcome: Mutex::new(SessionOutcome::Unauthorized),
        }
    }
}

impl MockAuthState {
    pub fn serve_user(&self, user: AuthUser) {
        self.serve_session(SessionOutcome::User(user));
    }

    pub fn serve_session(&self, outcome: SessionOutcome) {
        *self.session_outcome.lock().unwrap() = outcome;
    }

    pub fn serve_csrf(&self, outcome: CsrfOutcome) {
        *self.csrf_outcome.lock().unwrap() = outcome;
    }

    /// Change the token the backend serves and validates against.
    pub fn rotate_token(&self, token: &str) {
        *self.served_token.lock().unwrap() = token.to_string();
    }

    pub fn csrf_hits(&self) -> usize {
        self.csrf_hits.load(Ordering::SeqCst)
    }

    pub fn session_hits(&self) -> usize {
        self.session_hits.load(Ordering::SeqCst)
    }
}

#[get("/csrf")]
async fn csrf(state: web::Data<MockAuthState>) -> HttpResponse {
    state.csrf_hits.fetch_add(1, Ordering::SeqCst);
    match state.csrf_outcome.lock().unwrap().clone() {
        CsrfOutcome::Token => {
            let token = state.served_token.lock().unwrap().clone();
            HttpResponse::Ok().json(json!({ "csrfToken": token }))
        }
        CsrfOutcome::MissingField => HttpResponse::Ok().json(json!({})),
        CsrfOutcome::ServerError => {
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/session")]
async fn session(state: web::Data<MockAuthState>) -> HttpResponse {
    state.session_hits.fetch_add(1, Ordering::SeqCst);
    match state.session_outcome.lock().unwrap().clone() {
        SessionOutcome::User(user) => {
            HttpResponse::Ok().json(json!({ "user": user }))
        }
        SessionOutcome::Empty => HttpResponse::Ok().json(json!({})),
        SessionOutcome::Unauthorized => {
            HttpResponse::Unauthorized().finish()
        }
        SessionOutcome::ServerError => {
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Reports the CSRF header the request arrived with, without validating
/// it. Lets tests observe header injection and caller precedence.
#[post("/echo")]
async fn echo(request: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "received": received_token(&request) }))
}

/// Validates the CSRF header against the currently served token. Drives
/// the invalidate-and-retry caller pattern.
#[post("/update")]
async fn update(
    request: HttpRequest,
    state: web::Data<MockAuthState>,
) -> HttpResponse {
    let received = received_token(&request);
    let expected = state.served_token.lock().unwrap().clone();
    if received != expected {
        return HttpResponse::Forbidden()
            .json(json!({ "received": received }));
    }
    HttpResponse::Ok().json(json!({ "received": received }))
}

fn received_token(request: &HttpRequest) -> String {
    request
        .headers()
        .get(CSRF_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn auth_services() -> impl HttpServiceFactory {
    web::scope("/api/auth")
        .service(csrf)
        .service(session)
        .service(echo)
        .service(update)
}

pub struct TestApp {
    #[allow(unused)]
    pub port: u16,
    pub client: AuthClient,
    pub state: web::Data<MockAuthState>,
    pub time_source: TimeSource,
}

pub async fn spawn_app_on_port(port: u16) -> TestApp {
    let _ = LogTracer::init();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("error"))
        .finish();
    let _ = subscriber.try_init();

    #[cfg(feature = "mock-time")]
    let time_source = TimeSource::new("2025-01-01T00:00:00Z".parse().unwrap());

    #[cfg(not(feature = "mock-time"))]
    let time_source = TimeSource::new();

    let state = web::Data::new(MockAuthState::default());

    // OS assigns the port if binding to 0
    let listener =
        TcpListener::bind(format!("127.0.0.1:{port}")).unwrap();
    let port = listener.local_addr().unwrap().port();

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .service(auth_services())
    })
    .listen(listener)
    .unwrap()
    .run();
    tokio::spawn(server);

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(true)
        .build()
        .unwrap();

    TestApp {
        port,
        client: AuthClient::new(
            format!("http://127.0.0.1:{port}"),
            client,
            Rc::new(MemoryStore::new()),
            time_source.clone(),
        ),
        state,
        time_source,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_on_port(0).await
}

/// Test fixtures
pub fn alice() -> AuthUser {
    AuthUser {
        id: "u-alice".into(),
        name: "Alice".into(),
        email: "alice@example.com".into(),
        image: None,
        roles: vec!["member".into()],
        created_at: Some("2024-06-01T12:00:00Z".parse().unwrap()),
    }
}

pub fn bob() -> AuthUser {
    AuthUser {
        id: "u-bob".into(),
        name: "Bob".into(),
        email: "bob@example.com".into(),
        image: Some("https://example.com/bob.png".into()),
        roles: vec![],
        created_at: None,
    }
}
