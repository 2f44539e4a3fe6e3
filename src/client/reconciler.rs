//! Session reconciler
//! ------------------
//! Orchestrates agreement among the credential cookie, the persistent mirror
//! and the volatile identity cache. One reconciliation pass runs at a time;
//! a debounce window lets rapid repeat callers reuse the settled outcome
//! without touching the network. Consecutive failures while signed in are
//! counted and force a logout past the threshold.

use crate::client::api::ApiClient;
use crate::client::current::IdentityCell;
use crate::client::mirror::PersistentMirror;
use crate::client::{IdentityReader, SessionFault};
use crate::ident;
use crate::identity::Identity;
use anyhow::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Repeat calls inside this window reuse the settled result.
    pub debounce: Duration,
    /// Deadline for the authoritative session call; the call is abandoned.
    pub deadline: Duration,
    /// Consecutive failures while signed in before a forced logout.
    pub failure_threshold: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            deadline: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Where the session layer currently stands. Transitions are logged and only
/// happen inside a reconciliation pass or an explicit login/logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Checking,
    Authenticated,
    Restoring,
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Checking => "checking",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Restoring => "restoring",
            SessionPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Injected hook for the forced-logout path. The library ships a logging
/// no-op; the CLI prints; tests record.
pub trait ViewNavigator: Send + Sync {
    /// True when the active surface is fine to keep showing signed out,
    /// in which case no redirect is requested.
    fn on_anonymous_surface(&self) -> bool {
        false
    }
    fn request_login_redirect(&self, reason: &str);
}

pub struct LoggingNavigator;

impl ViewNavigator for LoggingNavigator {
    fn request_login_redirect(&self, reason: &str) {
        warn!(target: "vitalog::client", "login redirect requested: {reason}");
    }
}

struct ReconcilerState {
    phase: SessionPhase,
    failures: u32,
    settled: Option<(bool, Instant)>,
    last_fault: Option<SessionFault>,
}

pub struct SessionReconciler {
    api: Arc<ApiClient>,
    mirror: PersistentMirror,
    cell: IdentityCell,
    navigator: Arc<dyn ViewNavigator>,
    cfg: ReconcilerConfig,
    /// Serializes whole passes; the debounce window encloses the pass.
    pass: tokio::sync::Mutex<()>,
    state: Mutex<ReconcilerState>,
}

impl SessionReconciler {
    pub fn new(
        api: Arc<ApiClient>,
        mirror: PersistentMirror,
        cell: IdentityCell,
        navigator: Arc<dyn ViewNavigator>,
        cfg: ReconcilerConfig,
    ) -> Self {
        Self {
            api,
            mirror,
            cell,
            navigator,
            cfg,
            pass: tokio::sync::Mutex::new(()),
            state: Mutex::new(ReconcilerState {
                phase: SessionPhase::Anonymous,
                failures: 0,
                settled: None,
                last_fault: None,
            }),
        }
    }

    pub fn reader(&self) -> IdentityReader {
        self.cell.reader()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn last_fault(&self) -> Option<SessionFault> {
        self.state.lock().last_fault.clone()
    }

    /// Resolve "is this client signed in" against all three tiers.
    ///
    /// Idempotent: a repeat call within the debounce window returns the prior
    /// settled result without network traffic, and concurrent callers share
    /// one pass rather than racing N network calls.
    pub async fn check_session(&self) -> bool {
        if let Some(hit) = self.debounce_hit() {
            return hit;
        }
        let _pass = self.pass.lock().await;
        // someone else may have settled while we waited for the pass lock
        if let Some(hit) = self.debounce_hit() {
            return hit;
        }
        self.run_pass().await
    }

    fn debounce_hit(&self) -> Option<bool> {
        let st = self.state.lock();
        match st.settled {
            Some((outcome, at)) if at.elapsed() < self.cfg.debounce => Some(outcome),
            _ => None,
        }
    }

    async fn run_pass(&self) -> bool {
        self.transition(SessionPhase::Checking);

        let cookie_present = self.api.has_session_cookie();

        // No cookie but the mirror claims signed-in: try a restore first.
        if !cookie_present {
            let snap = self.mirror.snapshot();
            if snap.is_authenticated {
                if let Some(user) = snap.current_user {
                    self.transition(SessionPhase::Restoring);
                    match self.api.restore_session(&user).await {
                        Ok(Some(fresh)) => {
                            self.seed_authenticated(fresh);
                            return self.settle(true);
                        }
                        Ok(None) => {
                            info!(target: "vitalog::client", "restore rejected uid={}", user.id);
                            self.record_fault(SessionFault::RestoreRejected);
                            // continue to the authoritative check, unauthenticated
                        }
                        Err(fault) => return self.fail_pass(fault),
                    }
                }
            }
        }

        // Cookie present and the volatile cache already agrees: done.
        if cookie_present && self.cell.current().is_some() {
            self.reset_failures();
            self.transition(SessionPhase::Authenticated);
            return self.settle(true);
        }

        // Authoritative check, abandoned at the deadline.
        let outcome = match timeout(self.cfg.deadline, self.api.fetch_session()).await {
            Err(_) => Err(SessionFault::Network("session check deadline exceeded".into())),
            Ok(Err(fault)) => Err(fault),
            Ok(Ok(check)) => Ok(check),
        };

        match outcome {
            Ok(check) if check.authenticated => match check.user {
                Some(mut user) => {
                    user.contact_handle = ident::normalize_handle(&user.contact_handle);
                    self.seed_authenticated(user);
                    self.settle(true)
                }
                None => self.fail_pass(SessionFault::Network("authenticated without user".into())),
            },
            Ok(_) => {
                // Authoritative signed-out: terminal for this pass, not retried.
                self.clear_tiers();
                self.record_fault(SessionFault::AuthExpired);
                self.reset_failures();
                self.transition(SessionPhase::Anonymous);
                self.settle(false)
            }
            Err(fault) => self.fail_pass(fault),
        }
    }

    /// Network-class failure: fall back to the mirror optimistically, count
    /// the failure when the prior settled state was signed-in, and force a
    /// logout once the streak crosses the threshold.
    fn fail_pass(&self, fault: SessionFault) -> bool {
        let was_auth = matches!(self.state.lock().settled, Some((true, _)));

        let snap = self.mirror.snapshot();
        let result = match (snap.is_authenticated, snap.current_user) {
            (true, Some(user)) => {
                self.cell.set(user);
                true
            }
            _ => false,
        };

        if was_auth {
            let failures = {
                let mut st = self.state.lock();
                st.failures += 1;
                st.failures
            };
            warn!(
                target: "vitalog::client",
                "session check failed ({fault}); consecutive failures={failures}"
            );
            if failures >= self.cfg.failure_threshold {
                self.clear_tiers();
                self.reset_failures();
                self.record_fault(SessionFault::FailureThreshold(self.cfg.failure_threshold));
                self.transition(SessionPhase::Failed);
                if !self.navigator.on_anonymous_surface() {
                    self.navigator
                        .request_login_redirect("session could not be confirmed; sign in again");
                }
                return self.settle(false);
            }
        } else {
            debug!(target: "vitalog::client", "session check failed while signed out ({fault})");
        }

        self.record_fault(fault);
        self.transition(if result { SessionPhase::Authenticated } else { SessionPhase::Anonymous });
        self.settle(result)
    }

    /// Sign in against the server and seed every tier on success.
    pub async fn login(&self, handle: &str, password: &str) -> Result<Identity> {
        let _pass = self.pass.lock().await;
        self.transition(SessionPhase::Checking);
        match self.api.login(handle, password).await {
            Ok(user) => {
                self.seed_authenticated(user.clone());
                self.settle(true);
                Ok(user)
            }
            Err(e) => {
                self.restore_phase_from_cell();
                Err(e)
            }
        }
    }

    pub async fn register(
        &self,
        handle: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity> {
        let _pass = self.pass.lock().await;
        self.transition(SessionPhase::Checking);
        match self.api.register(handle, password, display_name).await {
            Ok(user) => {
                self.seed_authenticated(user.clone());
                self.settle(true);
                Ok(user)
            }
            Err(e) => {
                self.restore_phase_from_cell();
                Err(e)
            }
        }
    }

    /// Push a profile patch to the server and adopt the returned identity
    /// into the mirror and the volatile cache.
    pub async fn update_profile(&self, patch: serde_json::Value) -> Result<Identity> {
        let _pass = self.pass.lock().await;
        let user = self.api.update_profile(patch).await?;
        self.seed_authenticated(user.clone());
        self.settle(true);
        Ok(user)
    }

    /// Clear the cookie, blob and volatile cache. The last-known-uid hint is
    /// kept so anonymous-safe surfaces can still scope reads.
    pub async fn logout(&self) {
        let _pass = self.pass.lock().await;
        self.api.logout().await;
        self.cell.clear();
        if let Err(e) = self.mirror.clear_auth() {
            warn!(target: "vitalog::client", "mirror clear failed: {e:#}");
        }
        self.reset_failures();
        self.transition(SessionPhase::Anonymous);
        self.settle(false);
    }

    fn seed_authenticated(&self, user: Identity) {
        if let Err(e) = self.mirror.set_authenticated(&user) {
            warn!(target: "vitalog::client", "mirror write failed: {e:#}");
        }
        self.cell.set(user);
        self.api.persist_cookie();
        self.reset_failures();
        self.transition(SessionPhase::Authenticated);
    }

    fn clear_tiers(&self) {
        self.cell.clear();
        if let Err(e) = self.mirror.clear_auth() {
            warn!(target: "vitalog::client", "mirror clear failed: {e:#}");
        }
        self.api.clear_cookie();
    }

    fn restore_phase_from_cell(&self) {
        let phase = if self.cell.current().is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        };
        self.transition(phase);
    }

    fn settle(&self, outcome: bool) -> bool {
        self.state.lock().settled = Some((outcome, Instant::now()));
        outcome
    }

    fn transition(&self, next: SessionPhase) {
        let mut st = self.state.lock();
        if st.phase != next {
            info!(target: "vitalog::client", "session phase {} -> {}", st.phase, next);
            st.phase = next;
        }
    }

    fn record_fault(&self, fault: SessionFault) {
        self.state.lock().last_fault = Some(fault);
    }

    fn reset_failures(&self) {
        self.state.lock().failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_protocol_windows() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.debounce, Duration::from_secs(2));
        assert_eq!(cfg.deadline, Duration::from_secs(5));
        assert_eq!(cfg.failure_threshold, 3);
    }

    #[test]
    fn phase_names_are_stable() {
        assert_eq!(SessionPhase::Anonymous.to_string(), "anonymous");
        assert_eq!(SessionPhase::Restoring.to_string(), "restoring");
        assert_eq!(SessionPhase::Failed.to_string(), "failed");
    }
}
