//! Entity data synchronizer
//! ------------------------
//! Fetches the three entry kinds for the signed-in user in parallel and keeps
//! a short-TTL cache per (uid, kind). Concurrent syncs for the same scope are
//! coalesced onto one shared future, so rapid navigation does not produce
//! fetch storms. A failed kind keeps its previously cached data.

use crate::client::api::ApiClient;
use crate::client::mirror::UidHint;
use crate::client::reconciler::SessionReconciler;
use crate::client::{IdentityReader, SessionFault};
use crate::records::EntityKind;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entity cache lifetime; a fresh entry short-circuits the fetch.
    pub ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(5 * 60) }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Vec<serde_json::Value>,
    fetched_at: Instant,
}

/// What happened to one kind during the latest sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindOutcome {
    /// Cache was fresh; no network call.
    Hit,
    /// Fetched from the server; carries the record count.
    Fetched(usize),
    /// Fetch failed; previously cached data retained.
    Failed,
}

/// Summary of the most recent sync pass for one scope.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub uid: String,
    pub outcomes: Vec<(EntityKind, KindOutcome)>,
    pub fault: Option<SessionFault>,
    pub ok: bool,
}

pub struct DataSynchronizer {
    api: Arc<ApiClient>,
    reconciler: Arc<SessionReconciler>,
    reader: IdentityReader,
    hint: UidHint,
    cfg: SyncConfig,
    cache: Mutex<HashMap<(String, EntityKind), CacheEntry>>,
    inflight: Mutex<HashMap<String, Shared<BoxFuture<'static, bool>>>>,
    last_report: Mutex<Option<SyncReport>>,
}

impl DataSynchronizer {
    pub fn new(
        api: Arc<ApiClient>,
        reconciler: Arc<SessionReconciler>,
        hint: UidHint,
        cfg: SyncConfig,
    ) -> Arc<Self> {
        let reader = reconciler.reader();
        Arc::new(Self {
            api,
            reconciler,
            reader,
            hint,
            cfg,
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            last_report: Mutex::new(None),
        })
    }

    /// Fetch-or-reuse all entity kinds for `scope_id`. True iff every kind is
    /// now fresh (cache hit or successful fetch).
    pub async fn sync_data(self: &Arc<Self>, scope_id: &str) -> bool {
        self.sync_with_options(scope_id, false).await
    }

    /// Like [`sync_data`](Self::sync_data); `force_refresh` bypasses the TTL
    /// and always re-populates the cache.
    pub async fn sync_with_options(self: &Arc<Self>, scope_id: &str, force_refresh: bool) -> bool {
        let fut = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(scope_id) {
                debug!(target: "vitalog::client", "sync coalesced into in-flight pass scope={scope_id}");
                existing.clone()
            } else {
                let this = Arc::clone(self);
                let scope = scope_id.to_string();
                let fresh: Shared<BoxFuture<'static, bool>> = async move {
                    let out = this.run_sync(&scope, force_refresh).await;
                    this.inflight.lock().remove(&scope);
                    out
                }
                .boxed()
                .shared();
                inflight.insert(scope_id.to_string(), fresh.clone());
                fresh
            }
        };
        fut.await
    }

    async fn run_sync(&self, scope_id: &str, force_refresh: bool) -> bool {
        // Identity first; entity caches stay untouched when it fails.
        if !self.reconciler.check_session().await {
            self.finish_report(SyncReport {
                uid: scope_id.to_string(),
                outcomes: Vec::new(),
                fault: Some(SessionFault::AuthExpired),
                ok: false,
            });
            return false;
        }
        let uid = match self.reader.user_id() {
            Some(u) => u,
            None => {
                self.finish_report(SyncReport {
                    uid: scope_id.to_string(),
                    outcomes: Vec::new(),
                    fault: Some(SessionFault::AuthExpired),
                    ok: false,
                });
                return false;
            }
        };
        if uid != scope_id {
            warn!(
                target: "vitalog::client",
                "sync scope {scope_id} does not match signed-in uid {uid}; refusing"
            );
            self.finish_report(SyncReport {
                uid: scope_id.to_string(),
                outcomes: Vec::new(),
                fault: None,
                ok: false,
            });
            return false;
        }
        if let Err(e) = self.hint.set(&uid) {
            warn!(target: "vitalog::client", "uid hint write failed: {e:#}");
        }

        let mut outcomes: Vec<(EntityKind, KindOutcome)> = Vec::new();
        let mut to_fetch: Vec<EntityKind> = Vec::new();
        {
            let cache = self.cache.lock();
            for kind in EntityKind::ALL {
                let fresh = !force_refresh
                    && cache
                        .get(&(uid.clone(), kind))
                        .map(|e| e.fetched_at.elapsed() < self.cfg.ttl)
                        .unwrap_or(false);
                if fresh {
                    outcomes.push((kind, KindOutcome::Hit));
                } else {
                    to_fetch.push(kind);
                }
            }
        }

        let fetches = to_fetch.iter().map(|&kind| {
            let api = self.api.clone();
            let uid = uid.clone();
            async move { (kind, api.fetch_entities(&uid, kind).await) }
        });
        let results = futures_util::future::join_all(fetches).await;

        let mut failed: Vec<EntityKind> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for (kind, res) in results {
                match res {
                    Ok(list) => {
                        let n = list.len();
                        cache.insert(
                            (uid.clone(), kind),
                            CacheEntry { payload: list, fetched_at: Instant::now() },
                        );
                        outcomes.push((kind, KindOutcome::Fetched(n)));
                    }
                    Err(fault) => {
                        // previously cached data for this kind is retained
                        warn!(
                            target: "vitalog::client",
                            "fetch {kind} failed for uid={uid}: {fault}"
                        );
                        failed.push(kind);
                        outcomes.push((kind, KindOutcome::Failed));
                    }
                }
            }
        }

        let ok = failed.is_empty();
        let fault = if ok { None } else { Some(SessionFault::PartialSyncFailure(failed)) };
        self.finish_report(SyncReport { uid, outcomes, fault, ok });
        ok
    }

    /// Read-only copy of the merged local state for one kind. Staleness only
    /// governs refetching, never reads.
    pub fn snapshot(&self, uid: &str, kind: EntityKind) -> Option<Vec<serde_json::Value>> {
        self.cache
            .lock()
            .get(&(uid.to_string(), kind))
            .map(|e| e.payload.clone())
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().clone()
    }

    fn finish_report(&self, report: SyncReport) {
        *self.last_report.lock() = Some(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_five_minutes() {
        assert_eq!(SyncConfig::default().ttl, Duration::from_secs(300));
    }

    #[test]
    fn outcomes_compare() {
        assert_eq!(KindOutcome::Fetched(3), KindOutcome::Fetched(3));
        assert_ne!(KindOutcome::Hit, KindOutcome::Failed);
    }
}
