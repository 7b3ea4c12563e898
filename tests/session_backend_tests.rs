//! End-to-end tests of the session exchange and the credentialed client against an in-process
//! backend that implements the session-cookie endpoints and a small projects API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use opsconsole::identity::{LocalIdentity, LocalIdentityProvider, SharedIdentity};
use opsconsole::{ClientConfig, Console, ErrorKind, SessionStatus};

const COOKIE: &str = "__session";

#[derive(Default)]
struct Backend {
    valid_tokens: HashSet<String>,
    sessions: HashSet<String>,
    fail_logout: bool,
    expire_sessions: bool,
    login_hits: usize,
    logout_hits: usize,
    project_hits: usize,
    seen: Vec<(Option<String>, Option<String>)>,
}

type Shared = Arc<Mutex<Backend>>;

#[derive(Deserialize)]
struct LoginBody {
    #[serde(rename = "idToken")]
    id_token: String,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|kv| {
        let (k, v) = kv.trim().split_once('=')?;
        if k == name { Some(v.to_string()) } else { None }
    })
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::to_string)
}

async fn session_login(State(st): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    let mut b = st.lock();
    b.login_hits += 1;
    if !b.valid_tokens.contains(&body.id_token) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid id token"}))).into_response();
    }
    let sid = format!("sess-{}", body.id_token);
    b.sessions.insert(sid.clone());
    let mut h = HeaderMap::new();
    h.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&format!("{}={}; Path=/; HttpOnly; SameSite=Strict", COOKIE, sid)).unwrap(),
    );
    (StatusCode::OK, h, Json(json!({"status": "ok"}))).into_response()
}

async fn session_logout(State(st): State<Shared>, headers: HeaderMap) -> Response {
    let mut b = st.lock();
    b.logout_hits += 1;
    if b.fail_logout {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "teardown unavailable"}))).into_response();
    }
    if let Some(sid) = parse_cookie(&headers, COOKIE) {
        b.sessions.remove(&sid);
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, HeaderValue::from_static("__session=; Path=/; Max-Age=0; HttpOnly"));
    (StatusCode::OK, h, Json(json!({"status": "ok"}))).into_response()
}

fn authorized(b: &Backend, headers: &HeaderMap) -> bool {
    if b.expire_sessions {
        return false;
    }
    let by_cookie = parse_cookie(headers, COOKIE).map(|s| b.sessions.contains(&s)).unwrap_or(false);
    let by_bearer = bearer(headers).map(|t| b.valid_tokens.contains(&t)).unwrap_or(false);
    by_cookie || by_bearer
}

async fn list_projects(State(st): State<Shared>, headers: HeaderMap) -> Response {
    let mut b = st.lock();
    b.project_hits += 1;
    b.seen.push((parse_cookie(&headers, COOKIE), bearer(&headers)));
    if !authorized(&b, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "session expired"}))).into_response();
    }
    Json(json!([{"id": "p1", "name": "Roof"}])).into_response()
}

async fn create_project(State(st): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let b = st.lock();
    if !authorized(&b, &headers) {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"}))).into_response();
    }
    let mut out = body;
    out["id"] = json!("p2");
    (StatusCode::CREATED, Json(out)).into_response()
}

async fn update_project(Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    if body.get("name").is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "name required"}))).into_response();
    }
    Json(json!({"id": id, "name": body["name"]})).into_response()
}

async fn delete_project(Path(_id): Path<String>) -> StatusCode { StatusCode::NO_CONTENT }

async fn html_page() -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/html")], "<!doctype html><p>hosting fallback</p>").into_response()
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/auth/sessionLogin", post(session_login))
        .route("/api/auth/sessionLogout", post(session_logout))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}", patch(update_project).delete(delete_project))
        .route("/api/html", get(html_page))
        .with_state(state)
}

// Start the backend on an ephemeral localhost port. Returns (join_handle, api_base).
async fn start_backend(state: Shared) -> (JoinHandle<()>, String) {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("backend task error: {e:?}");
        }
    });
    (handle, format!("http://{}/api", addr))
}

fn backend_with_tokens(tokens: &[&str]) -> Shared {
    let mut b = Backend::default();
    b.valid_tokens = tokens.iter().map(|t| t.to_string()).collect();
    Arc::new(Mutex::new(b))
}

fn console_for(base: &str, identity: SharedIdentity) -> (Console, Arc<LocalIdentityProvider>) {
    let config = ClientConfig::new(base).with_exchange_timeout(Duration::from_secs(3));
    let provider = Arc::new(LocalIdentityProvider::with_pending(identity));
    let console = Console::new(config, provider.clone()).expect("console");
    console.start();
    (console, provider)
}

#[tokio::test]
async fn login_then_request_carries_cookie_and_bearer() {
    let backend = backend_with_tokens(&["tok-alice"]);
    let (server, base) = start_backend(backend.clone()).await;
    let alice = LocalIdentity::new("alice", "tok-alice").with_display_name("Alice").shared();
    let (console, _provider) = console_for(&base, alice);

    let view = console.session.sign_in().await.expect("sign in");
    assert_eq!(view.status, SessionStatus::Authenticated);
    assert!(view.can_render_privileged());
    let who = view.identity.expect("identity");
    assert_eq!(who.uid, "alice");
    assert_eq!(who.display_name.as_deref(), Some("Alice"));

    let projects: Value = console.api.get_json("/projects").await.expect("projects");
    assert_eq!(projects[0]["id"], "p1");

    let b = backend.lock();
    assert_eq!(b.login_hits, 1);
    let (cookie, token) = b.seen.last().cloned().expect("request seen");
    assert_eq!(cookie.as_deref(), Some("sess-tok-alice"));
    assert_eq!(token.as_deref(), Some("tok-alice"));
    drop(b);
    server.abort();
}

#[tokio::test]
async fn rejected_token_leaves_exchange_failed() {
    let backend = backend_with_tokens(&[]);
    let (server, base) = start_backend(backend.clone()).await;
    let (console, _p) = console_for(&base, LocalIdentity::new("mallory", "forged").shared());

    let view = console.session.sign_in().await.expect("provider sign in succeeds");
    assert_eq!(view.status, SessionStatus::ExchangeFailed);
    assert!(view.needs_retry());
    assert!(!view.can_render_privileged());
    let err = view.last_error.expect("last error");
    assert_eq!(err.kind(), ErrorKind::BackendRejected);
    assert_eq!(err.status(), Some(401));
    assert!(err.message().contains("invalid id token"), "message: {}", err.message());

    // retry goes back through exchanging and fails the same way; nothing retries on its own
    assert_eq!(backend.lock().login_hits, 1);
    console.session.retry().expect("retry").await.unwrap();
    assert_eq!(console.session.status(), SessionStatus::ExchangeFailed);
    assert_eq!(backend.lock().login_hits, 2);
    server.abort();
}

#[tokio::test]
async fn expired_credential_fails_as_token_unavailable() {
    let backend = backend_with_tokens(&["tok-bob"]);
    let (server, base) = start_backend(backend.clone()).await;
    let bob = Arc::new(LocalIdentity::new("bob", "tok-bob"));
    bob.expire();
    let (console, _p) = console_for(&base, bob.clone());

    let view = console.session.sign_in().await.unwrap();
    assert_eq!(view.status, SessionStatus::ExchangeFailed);
    assert_eq!(view.last_error.unwrap().kind(), ErrorKind::TokenUnavailable);
    assert_eq!(backend.lock().login_hits, 0);

    // credential renewed at the provider, user retries
    bob.set_token("tok-bob");
    console.session.retry().expect("retry").await.unwrap();
    assert_eq!(console.session.status(), SessionStatus::Authenticated);
    server.abort();
}

#[tokio::test]
async fn unauthorized_response_forces_sign_out_without_retry() {
    let backend = backend_with_tokens(&["tok-alice"]);
    let (server, base) = start_backend(backend.clone()).await;
    let (console, _p) = console_for(&base, LocalIdentity::new("alice", "tok-alice").shared());
    assert_eq!(console.session.sign_in().await.unwrap().status, SessionStatus::Authenticated);

    backend.lock().expire_sessions = true;
    let err = console.api.get_json::<Value>("/projects").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.status(), Some(401));

    let view = console.session.view();
    assert_eq!(view.status, SessionStatus::Unauthenticated);
    assert!(view.identity.is_none());
    assert_eq!(view.last_error.unwrap().kind(), ErrorKind::Unauthorized);
    assert_eq!(backend.lock().project_hits, 1);

    // no identity any more, so the next call carries no bearer token
    let _ = console.api.get_json::<Value>("/projects").await;
    let b = backend.lock();
    assert_eq!(b.project_hits, 2);
    assert_eq!(b.seen.last().unwrap().1, None);
    drop(b);
    server.abort();
}

#[tokio::test]
async fn forbidden_is_unauthorized_too() {
    let backend = backend_with_tokens(&["tok-alice"]);
    let (server, base) = start_backend(backend.clone()).await;
    let (console, _p) = console_for(&base, LocalIdentity::new("alice", "tok-alice").shared());
    console.session.sign_in().await.unwrap();

    backend.lock().expire_sessions = true;
    let err = console.api.post_json::<Value, _>("/projects", &json!({"name": "Deck"})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.status(), Some(403));
    assert_eq!(console.session.status(), SessionStatus::Unauthenticated);
    server.abort();
}

#[tokio::test]
async fn logout_completes_when_backend_teardown_fails() {
    let backend = backend_with_tokens(&["tok-alice"]);
    backend.lock().fail_logout = true;
    let (server, base) = start_backend(backend.clone()).await;
    let (console, provider) = console_for(&base, LocalIdentity::new("alice", "tok-alice").shared());
    console.session.sign_in().await.unwrap();

    console.session.logout().await.expect("local sign-out");
    let view = console.session.view();
    assert_eq!(view.status, SessionStatus::Unauthenticated);
    assert!(view.identity.is_none());
    assert!(provider.current().is_none());

    console.session.flush_teardown().await;
    assert_eq!(backend.lock().logout_hits, 1);
    assert_eq!(console.session.status(), SessionStatus::Unauthenticated);
    server.abort();
}

#[tokio::test]
async fn logout_completes_when_backend_is_unreachable() {
    let config = ClientConfig::new("http://127.0.0.1:1/api").with_exchange_timeout(Duration::from_millis(500));
    let provider = Arc::new(LocalIdentityProvider::new());
    let console = Console::new(config, provider.clone()).unwrap();
    provider.publish(Some(LocalIdentity::new("alice", "tok").shared()));
    console.start();

    // nothing listens on port 1: the exchange fails as a network error
    let view = console.session.settled().await;
    assert_eq!(view.status, SessionStatus::ExchangeFailed);
    assert_eq!(view.last_error.unwrap().kind(), ErrorKind::Network);

    console.session.logout().await.unwrap();
    assert_eq!(console.session.status(), SessionStatus::Unauthenticated);
    console.session.flush_teardown().await;
    assert_eq!(console.session.status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn logout_tears_down_backend_session() {
    let backend = backend_with_tokens(&["tok-alice"]);
    let (server, base) = start_backend(backend.clone()).await;
    let (console, _p) = console_for(&base, LocalIdentity::new("alice", "tok-alice").shared());
    console.session.sign_in().await.unwrap();
    assert_eq!(backend.lock().sessions.len(), 1);

    console.session.logout().await.unwrap();
    console.session.flush_teardown().await;
    assert!(backend.lock().sessions.is_empty());

    let err = console.api.get_json::<Value>("/projects").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    server.abort();
}

#[tokio::test]
async fn verbs_and_error_surfacing() {
    let backend = backend_with_tokens(&["tok-alice"]);
    let (server, base) = start_backend(backend.clone()).await;
    let (console, _p) = console_for(&base, LocalIdentity::new("alice", "tok-alice").shared());
    console.session.sign_in().await.unwrap();

    let created: Value = console.api.post_json("/projects", &json!({"name": "Deck"})).await.unwrap();
    assert_eq!(created, json!({"name": "Deck", "id": "p2"}));

    let updated: Value = console.api.patch_json("projects/p2", &json!({"name": "Deck 2"})).await.unwrap();
    assert_eq!(updated["name"], "Deck 2");

    let err = console.api.patch_json::<Value, _>("/projects/p2", &json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendRejected);
    assert_eq!(err.message(), "400 Bad Request: name required");
    // a rejected business call does not touch the session
    assert_eq!(console.session.status(), SessionStatus::Authenticated);

    let deleted: Value = console.api.delete_json("/projects/p2").await.unwrap();
    assert_eq!(deleted, json!({}));

    let err = console.api.get_json::<Value>("/html").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert_eq!(console.session.status(), SessionStatus::Authenticated);
    server.abort();
}
