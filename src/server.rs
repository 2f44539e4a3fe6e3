//!
//! vitalog HTTP server
//! -------------------
//! Axum-based JSON API for the wellbeing journal.
//!
//! Responsibilities:
//! - Credential store: signed session cookies, login/register/logout/restore.
//! - Session check endpoint with short private-cache headers.
//! - Entity endpoints (meals, sleep, checkins) with ETag/304 handling.
//! - Profile updates as the only identity mutation path.
//! - Background snapshot flushing of the journal store.
//! - Route counters and a fault plan used by the integration suite.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, SessionManager, TokenCodec, SESSION_COOKIE};
use crate::records::EntityKind;
use crate::server::store::{ProfilePatch, SharedJournal};

pub mod store;

/// Seven days, matching the token TTL.
const COOKIE_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;
const FLUSH_INTERVAL_SECS: u64 = 2;

/// Per-route hit counters. The integration suite reads these to assert how
/// many network calls the client stack actually made.
#[derive(Default)]
pub struct RouteCounters {
    pub session_checks: AtomicU64,
    pub restores: AtomicU64,
    pub logins: AtomicU64,
    pub saves: AtomicU64,
    entity_gets: [AtomicU64; 3],
}

impl RouteCounters {
    fn kind_slot(kind: EntityKind) -> usize {
        match kind {
            EntityKind::Meals => 0,
            EntityKind::Sleep => 1,
            EntityKind::Checkins => 2,
        }
    }

    fn bump_entity(&self, kind: EntityKind) {
        self.entity_gets[Self::kind_slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn entity_gets_for(&self, kind: EntityKind) -> u64 {
        self.entity_gets[Self::kind_slot(kind)].load(Ordering::Relaxed)
    }

    pub fn entity_gets_total(&self) -> u64 {
        self.entity_gets.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// Switchable failures for exercising the client's degradation paths:
/// a failing or delayed session check, or failing fetches for chosen
/// entity kinds.
#[derive(Default)]
pub struct FaultPlan {
    fail_session: AtomicBool,
    /// Holds the session-check handler this long before it answers, so the
    /// client's deadline can expire first. Zero means no delay.
    delay_session_ms: AtomicU64,
    fail_kinds: parking_lot::Mutex<HashSet<EntityKind>>,
}

impl FaultPlan {
    pub fn set_fail_session(&self, on: bool) {
        self.fail_session.store(on, Ordering::Relaxed);
    }

    pub fn set_session_delay_ms(&self, ms: u64) {
        self.delay_session_ms.store(ms, Ordering::Relaxed);
    }

    pub fn set_fail_kind(&self, kind: EntityKind, on: bool) {
        let mut kinds = self.fail_kinds.lock();
        if on {
            kinds.insert(kind);
        } else {
            kinds.remove(&kind);
        }
    }

    fn session_should_fail(&self) -> bool {
        self.fail_session.load(Ordering::Relaxed)
    }

    fn session_delay(&self) -> Option<std::time::Duration> {
        match self.delay_session_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }

    fn kind_should_fail(&self, kind: EntityKind) -> bool {
        self.fail_kinds.lock().contains(&kind)
    }
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub journal: SharedJournal,
    pub sessions: Arc<SessionManager>,
    pub counters: Arc<RouteCounters>,
    pub faults: Arc<FaultPlan>,
}

fn log_startup_folders(data_root: &str) {
    let cwd = std::env::current_dir().ok();
    let data_env = std::env::var("VITALOG_DATA_FOLDER").ok();
    info!(
        target: "startup",
        "vitalog starting. cwd={:?}, data_root_param={:?}, VITALOG_DATA_FOLDER_env={:?}",
        cwd, data_root, data_env
    );
}

pub fn build_state(data_root: &Path, token_secret: &str) -> anyhow::Result<AppState> {
    let journal = SharedJournal::open(data_root)?;
    let sessions = Arc::new(SessionManager::new(TokenCodec::new(token_secret.as_bytes().to_vec())));
    Ok(AppState {
        journal,
        sessions,
        counters: Arc::new(RouteCounters::default()),
        faults: Arc::new(FaultPlan::default()),
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "vitalog ok" }))
        .route("/session", get(session_check).post(session_restore))
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/logout", post(logout))
        .route("/profile", post(update_profile))
        .route("/{kind}", get(list_entities).post(save_entity))
        .with_state(state)
}

/// Periodically persist the journal when it changed.
pub fn start_background_flush(state: &AppState) {
    let journal = state.journal.clone();
    tokio::spawn(async move {
        use std::time::Duration;
        loop {
            if let Err(e) = journal.0.flush_if_dirty() {
                error!("journal flush failed: {e:#}");
            }
            tokio::time::sleep(Duration::from_secs(FLUSH_INTERVAL_SECS)).await;
        }
    });
}

/// Bind an ephemeral localhost port and serve in a background task. Returns
/// the bound address and the state handle; used by the integration suite.
pub async fn spawn_ephemeral(
    data_root: &Path,
    token_secret: &str,
) -> anyhow::Result<(SocketAddr, AppState)> {
    let state = build_state(data_root, token_secret)?;
    start_background_flush(&state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = build_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {e}");
        }
    });
    Ok((addr, state))
}

/// Start the vitalog HTTP server bound to the given port.
pub async fn run_with_port(
    http_port: u16,
    data_root: &str,
    token_secret: Option<String>,
) -> anyhow::Result<()> {
    log_startup_folders(data_root);
    let secret = match token_secret {
        Some(s) => s,
        None => {
            let s = TokenCodec::random_secret();
            info!("VITALOG_TOKEN_SECRET not set; sessions will not survive a server restart");
            s
        }
    };
    let state = build_state(Path::new(data_root), &secret)?;
    start_background_flush(&state);
    let app = build_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    handle: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    handle: String,
    password: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RestorePayload {
    action: String,
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct UidQuery {
    uid: String,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn set_session_cookie(token: &str) -> HeaderValue {
    // HttpOnly, Lax; no Secure flag so plain-http local clients work
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Max-Age={}; Path=/",
        SESSION_COOKIE, token, COOKIE_MAX_AGE_SECS
    ))
    .unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

/// Resolve the signed-in user from the request cookie. Prefers the store's
/// copy of the identity so profile updates show up without a new login.
fn current_user(state: &AppState, headers: &HeaderMap) -> Option<Identity> {
    let token = parse_cookie(headers, SESSION_COOKIE)?;
    let claims_user = state.sessions.validate(&token)?;
    state.journal.0.get_user(&claims_user.id).or(Some(claims_user))
}

fn issue_cookie(state: &AppState, user: Identity) -> AppResult<HeaderMap> {
    let issued = state.sessions.issue(user)?;
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", set_session_cookie(&issued.token));
    Ok(h)
}

fn err_response(e: &AppError) -> (StatusCode, HeaderMap, Json<Value>) {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        HeaderMap::new(),
        Json(json!({"success": false, "code": e.code_str(), "message": e.message()})),
    )
}

/// Stable ETag for a byte slice using xxh3_64, fixed-width lowercase hex.
fn etag_for_bytes(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

async fn session_check(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    state.counters.session_checks.fetch_add(1, Ordering::Relaxed);
    if let Some(delay) = state.faults.session_delay() {
        tokio::time::sleep(delay).await;
    }
    let mut h = HeaderMap::new();
    h.insert("Cache-Control", HeaderValue::from_static("private, max-age=5"));
    if state.faults.session_should_fail() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            h,
            Json(json!({"authenticated": false, "error": "unavailable"})),
        );
    }
    match current_user(&state, &headers) {
        Some(user) => (StatusCode::OK, h, Json(json!({"authenticated": true, "user": user}))),
        None => {
            h.insert("Set-Cookie", clear_session_cookie());
            (StatusCode::UNAUTHORIZED, h, Json(json!({"authenticated": false})))
        }
    }
}

/// Mirror-seeded restore: accept only when the mirrored identity matches an
/// account on record, then issue a fresh cookie.
async fn session_restore(
    State(state): State<AppState>,
    Json(payload): Json<RestorePayload>,
) -> impl IntoResponse {
    state.counters.restores.fetch_add(1, Ordering::Relaxed);
    if state.faults.session_should_fail() {
        return err_response(&AppError::internal("unavailable", "session service down"));
    }
    if payload.action != "restore" {
        return err_response(&AppError::user("bad_action", "unsupported session action"));
    }
    match state
        .journal
        .0
        .confirm_restore(&payload.user.id, &payload.user.contact_handle)
    {
        Some(user) => match issue_cookie(&state, user.clone()) {
            Ok(h) => (StatusCode::OK, h, Json(json!({"success": true, "user": user}))),
            Err(e) => err_response(&e),
        },
        None => {
            info!(target: "vitalog::server", "restore refused uid={}", payload.user.id);
            (StatusCode::UNAUTHORIZED, HeaderMap::new(), Json(json!({"success": false})))
        }
    }
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> impl IntoResponse {
    state.counters.logins.fetch_add(1, Ordering::Relaxed);
    match state.journal.0.authenticate(&payload.handle, &payload.password) {
        Ok(user) => match issue_cookie(&state, user.clone()) {
            Ok(h) => (StatusCode::OK, h, Json(json!({"success": true, "user": user}))),
            Err(e) => err_response(&e),
        },
        Err(e) => err_response(&e),
    }
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> impl IntoResponse {
    match state
        .journal
        .0
        .register(&payload.handle, &payload.password, &payload.display_name)
    {
        Ok(user) => match issue_cookie(&state, user.clone()) {
            Ok(h) => (StatusCode::OK, h, Json(json!({"success": true, "user": user}))),
            Err(e) => err_response(&e),
        },
        Err(e) => err_response(&e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = parse_cookie(&headers, SESSION_COOKIE) {
        state.sessions.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"success": true})))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> impl IntoResponse {
    let Some(user) = current_user(&state, &headers) else {
        return err_response(&AppError::auth("no_session", "sign in required"));
    };
    match state.journal.0.update_profile(&user.id, &patch) {
        Ok(updated) => (StatusCode::OK, HeaderMap::new(), Json(json!({"success": true, "user": updated}))),
        Err(e) => err_response(&e),
    }
}

async fn list_entities(
    State(state): State<AppState>,
    UrlPath(kind): UrlPath<String>,
    Query(q): Query<UidQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&kind) else {
        return err_response(&AppError::not_found("unknown_kind", "no such collection"));
    };
    state.counters.bump_entity(kind);
    if state.faults.kind_should_fail(kind) {
        return err_response(&AppError::io("injected_fault", "collection temporarily unavailable"));
    }
    let Some(user) = current_user(&state, &headers) else {
        let mut h = HeaderMap::new();
        h.insert("Set-Cookie", clear_session_cookie());
        return (StatusCode::UNAUTHORIZED, h, Json(json!({"success": false})));
    };
    if user.id != q.uid {
        return err_response(&AppError::user("uid_mismatch", "uid does not match the signed-in user"));
    }
    let list: Vec<Value> =
        state.journal.0.list_records(&q.uid, kind).iter().map(|r| r.to_wire()).collect();
    let body = json!({"success": true, (kind.as_str()): list});
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    let tag = etag_for_bytes(&bytes);
    let mut h = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&tag) {
        h.insert("ETag", v);
    }
    let if_none_match = headers.get("if-none-match").and_then(|v| v.to_str().ok());
    if if_none_match == Some(tag.as_str()) {
        return (StatusCode::NOT_MODIFIED, h, Json(json!({})));
    }
    (StatusCode::OK, h, Json(body))
}

async fn save_entity(
    State(state): State<AppState>,
    UrlPath(kind): UrlPath<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&kind) else {
        return err_response(&AppError::not_found("unknown_kind", "no such collection"));
    };
    state.counters.saves.fetch_add(1, Ordering::Relaxed);
    if state.faults.kind_should_fail(kind) {
        return err_response(&AppError::io("injected_fault", "collection temporarily unavailable"));
    }
    let Some(user) = current_user(&state, &headers) else {
        let mut h = HeaderMap::new();
        h.insert("Set-Cookie", clear_session_cookie());
        return (StatusCode::UNAUTHORIZED, h, Json(json!({"success": false})));
    };
    let Some(uid) = payload.get("uid").and_then(|u| u.as_str()) else {
        return err_response(&AppError::user("missing_uid", "request must carry a uid"));
    };
    if user.id != uid {
        return err_response(&AppError::user("uid_mismatch", "uid does not match the signed-in user"));
    }
    let Some(data) = payload.get(kind.payload_field()).cloned() else {
        return err_response(&AppError::user(
            "missing_payload".to_string(),
            format!("request must carry {}", kind.payload_field()),
        ));
    };
    let mut rec = match crate::records::EntityRecord::from_wire(kind, data) {
        Ok(r) => r,
        Err(e) => return err_response(&e),
    };
    rec.set_uid(uid.to_string());
    match state.journal.0.append_record(rec) {
        Ok(saved) => (
            StatusCode::OK,
            HeaderMap::new(),
            Json(json!({"success": true, (kind.singular()): saved.to_wire()})),
        ),
        Err(e) => err_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_finds_the_right_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("theme=dark; vitalog_session=tok.sig; other=1"),
        );
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("tok.sig"));
        assert_eq!(parse_cookie(&headers, "theme").as_deref(), Some("dark"));
        assert!(parse_cookie(&headers, "missing").is_none());
    }

    #[test]
    fn session_cookie_attributes() {
        let v = set_session_cookie("abc.def");
        let s = v.to_str().unwrap();
        assert!(s.starts_with("vitalog_session=abc.def"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Lax"));
        assert!(s.contains("Max-Age=604800"));
        let c = clear_session_cookie().to_str().unwrap().to_string();
        assert!(c.contains("Expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn etags_are_stable_and_distinct() {
        let a = etag_for_bytes(b"hello");
        let b = etag_for_bytes(b"hello");
        let c = etag_for_bytes(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fault_plan_toggles() {
        let plan = FaultPlan::default();
        assert!(!plan.kind_should_fail(EntityKind::Sleep));
        plan.set_fail_kind(EntityKind::Sleep, true);
        assert!(plan.kind_should_fail(EntityKind::Sleep));
        assert!(!plan.kind_should_fail(EntityKind::Meals));
        plan.set_fail_kind(EntityKind::Sleep, false);
        assert!(!plan.kind_should_fail(EntityKind::Sleep));
        plan.set_fail_session(true);
        assert!(plan.session_should_fail());

        assert!(plan.session_delay().is_none());
        plan.set_session_delay_ms(250);
        assert_eq!(plan.session_delay(), Some(std::time::Duration::from_millis(250)));
        plan.set_session_delay_ms(0);
        assert!(plan.session_delay().is_none());
    }
}
