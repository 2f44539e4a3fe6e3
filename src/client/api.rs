//! HTTP client for the journal API
//! -------------------------------
//! Wraps reqwest with a cookie jar so the signed session cookie travels
//! automatically, and persists that cookie to a small JSON file in the state
//! folder so the credential tier survives process restarts.

use crate::client::SessionFault;
use crate::ident;
use crate::identity::{Identity, SESSION_COOKIE};
use crate::records::EntityKind;
use anyhow::{anyhow, Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Folder for the persisted cookie file; no persistence when absent.
    pub state_folder: Option<PathBuf>,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ApiConfig { base_url: base_url.into(), state_folder: None }
    }

    pub fn with_state_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.state_folder = Some(folder.into());
        self
    }
}

/// Authoritative session answer from `GET /session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheck {
    pub authenticated: bool,
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCookie {
    value: String,
    saved_at: i64,
}

pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    jar: Arc<Jar>,
    cookie_path: Option<PathBuf>,
}

impl ApiClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url).context("invalid base URL")?;
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .use_rustls_tls()
            .build()?;
        let cookie_path = match &cfg.state_folder {
            Some(folder) => {
                fs::create_dir_all(folder).ok();
                Some(folder.join("cookie.json"))
            }
            None => None,
        };
        let client = Self { base, http, jar, cookie_path };
        client.load_cookie_file();
        Ok(client)
    }

    /// Synchronous cookie-presence check against the jar; no network.
    pub fn has_session_cookie(&self) -> bool {
        self.session_cookie_value().is_some()
    }

    fn session_cookie_value(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let header = header.to_str().ok()?;
        for pair in header.split(';') {
            let pair = pair.trim();
            if let Some(v) = pair.strip_prefix(SESSION_COOKIE) {
                if let Some(v) = v.strip_prefix('=') {
                    if !v.is_empty() {
                        return Some(v.to_string());
                    }
                }
            }
        }
        None
    }

    fn load_cookie_file(&self) {
        let path = match &self.cookie_path {
            Some(p) => p,
            None => return,
        };
        let raw = match fs::read_to_string(path) {
            Ok(r) => r,
            Err(_) => return,
        };
        if let Ok(stored) = serde_json::from_str::<StoredCookie>(&raw) {
            if stored.value.is_empty() {
                return;
            }
            // a cookie saved longer ago than the token TTL cannot validate
            let age = crate::identity::now_ms().saturating_sub(stored.saved_at);
            if age >= crate::identity::DEFAULT_SESSION_TTL_MS {
                debug!(target: "vitalog::client", "persisted cookie outlived the token; dropped");
                let _ = fs::remove_file(path);
                return;
            }
            let line = format!("{}={}; Path=/", SESSION_COOKIE, stored.value);
            self.jar.add_cookie_str(&line, &self.base);
            debug!(target: "vitalog::client", "cookie reloaded from state folder");
        }
    }

    /// Write the jar's session cookie to the state folder, or remove the file
    /// when the jar no longer holds one.
    pub fn persist_cookie(&self) {
        let path = match &self.cookie_path {
            Some(p) => p,
            None => return,
        };
        match self.session_cookie_value() {
            Some(value) => {
                let stored = StoredCookie { value, saved_at: crate::identity::now_ms() };
                if let Ok(body) = serde_json::to_vec_pretty(&stored) {
                    let tmp = path.with_extension("json.tmp");
                    if fs::write(&tmp, body).is_ok() {
                        let _ = fs::rename(&tmp, path);
                    }
                }
            }
            None => {
                let _ = fs::remove_file(path);
            }
        }
    }

    /// Drop the session cookie from the jar and the state folder.
    pub fn clear_cookie(&self) {
        let line = format!("{}=; Max-Age=0; Path=/", SESSION_COOKIE);
        self.jar.add_cookie_str(&line, &self.base);
        if let Some(path) = &self.cookie_path {
            let _ = fs::remove_file(path);
        }
    }

    /// `GET /session`. A 401 is an authoritative "not authenticated", not an
    /// error; transport and parse trouble map to [`SessionFault::Network`].
    pub async fn fetch_session(&self) -> Result<SessionCheck, SessionFault> {
        let url = self.join("/session")?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SessionFault::Network(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 {
            // the server clears the cookie alongside a 401; mirror that on disk
            self.persist_cookie();
            return Ok(SessionCheck { authenticated: false, user: None });
        }
        if !status.is_success() {
            return Err(SessionFault::Network(format!("session check: HTTP {status}")));
        }
        let check: SessionCheck =
            resp.json().await.map_err(|e| SessionFault::Network(e.to_string()))?;
        self.persist_cookie();
        Ok(check)
    }

    /// Mirror-seeded restore. `Ok(Some(_))` re-authenticated with a fresh
    /// cookie; `Ok(None)` the server refused the mirrored identity.
    pub async fn restore_session(&self, user: &Identity) -> Result<Option<Identity>, SessionFault> {
        let url = self.join("/session")?;
        let body = serde_json::json!({"action": "restore", "user": user});
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionFault::Network(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SessionFault::Network(format!("restore: HTTP {status}")));
        }
        let v: serde_json::Value =
            resp.json().await.map_err(|e| SessionFault::Network(e.to_string()))?;
        if v.get("success").and_then(|s| s.as_bool()) != Some(true) {
            return Ok(None);
        }
        let fresh = v
            .get("user")
            .cloned()
            .and_then(|u| serde_json::from_value::<Identity>(u).ok());
        match fresh {
            Some(u) => {
                self.persist_cookie();
                Ok(Some(u))
            }
            None => Err(SessionFault::Network("restore: user missing in response".into())),
        }
    }

    /// Entity list fetch for the synchronizer. 401 means the cookie went bad
    /// mid-sync and maps to [`SessionFault::AuthExpired`].
    pub async fn fetch_entities(
        &self,
        uid: &str,
        kind: EntityKind,
    ) -> Result<Vec<serde_json::Value>, SessionFault> {
        let url = self.join(&format!("/{}", kind.as_str()))?;
        let resp = self
            .http
            .get(url)
            .query(&[("uid", uid)])
            .send()
            .await
            .map_err(|e| SessionFault::Network(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(SessionFault::AuthExpired);
        }
        if !status.is_success() {
            return Err(SessionFault::Network(format!("{}: HTTP {}", kind, status)));
        }
        let v: serde_json::Value =
            resp.json().await.map_err(|e| SessionFault::Network(e.to_string()))?;
        if v.get("success").and_then(|s| s.as_bool()) != Some(true) {
            return Err(SessionFault::Network(format!("{}: server reported failure", kind)));
        }
        let list = v
            .get(kind.as_str())
            .and_then(|l| l.as_array())
            .cloned()
            .ok_or_else(|| SessionFault::Network(format!("{}: list missing", kind)))?;
        Ok(list)
    }

    /// Append one record; returns the echoed record with its server id.
    pub async fn save_entity(
        &self,
        uid: &str,
        kind: EntityKind,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.join(&format!("/{}", kind.as_str()))?;
        let body = serde_json::json!({"uid": uid, (kind.payload_field()): payload});
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        if !status.is_success() {
            return Err(anyhow!("save {} failed: HTTP {} {}", kind, status, v));
        }
        v.get(kind.singular())
            .cloned()
            .ok_or_else(|| anyhow!("save {}: record missing in response", kind))
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<Identity> {
        let url = self.join("/login")?;
        let body = serde_json::json!({
            "handle": ident::normalize_handle(handle),
            "password": password,
        });
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        if !status.is_success() {
            return Err(anyhow!(
                "login failed: {}",
                v.get("message").and_then(|m| m.as_str()).unwrap_or("invalid credentials")
            ));
        }
        let user: Identity = serde_json::from_value(
            v.get("user").cloned().ok_or_else(|| anyhow!("login: user missing"))?,
        )?;
        self.persist_cookie();
        Ok(user)
    }

    pub async fn register(
        &self,
        handle: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity> {
        let url = self.join("/register")?;
        let body = serde_json::json!({
            "handle": ident::normalize_handle(handle),
            "password": password,
            "displayName": ident::normalize_display_name(display_name),
        });
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        if !status.is_success() {
            return Err(anyhow!(
                "register failed: {}",
                v.get("message").and_then(|m| m.as_str()).unwrap_or("registration rejected")
            ));
        }
        let user: Identity = serde_json::from_value(
            v.get("user").cloned().ok_or_else(|| anyhow!("register: user missing"))?,
        )?;
        self.persist_cookie();
        Ok(user)
    }

    /// Best-effort server-side logout; local cookie state is cleared either way.
    pub async fn logout(&self) {
        if let Ok(url) = self.join("/logout") {
            let _ = self.http.post(url).send().await;
        }
        self.clear_cookie();
    }

    pub async fn update_profile(&self, patch: serde_json::Value) -> Result<Identity> {
        let url = self.join("/profile")?;
        let resp = self.http.post(url).json(&patch).send().await?;
        let status = resp.status();
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({}));
        if !status.is_success() {
            return Err(anyhow!(
                "profile update failed: {}",
                v.get("message").and_then(|m| m.as_str()).unwrap_or("rejected")
            ));
        }
        let user: Identity = serde_json::from_value(
            v.get("user").cloned().ok_or_else(|| anyhow!("profile: user missing"))?,
        )?;
        Ok(user)
    }

    fn join(&self, path: &str) -> Result<Url, SessionFault> {
        self.base
            .join(path)
            .map_err(|e| SessionFault::Network(format!("bad url {path}: {e}")))
    }
}
