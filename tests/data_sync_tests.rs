use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use vitalog::client::{
    identity_cell, ApiClient, ApiConfig, DataSynchronizer, KindOutcome, LoggingNavigator,
    PersistentMirror, ReconcilerConfig, SessionFault, SessionReconciler, SyncConfig,
};
use vitalog::identity::{now_ms, Identity};
use vitalog::records::EntityKind;
use vitalog::server::{self, AppState};

const SECRET: &str = "sync-test-secret";

async fn start_server() -> (TempDir, String, AppState) {
    let data = tempfile::tempdir().expect("data dir");
    let (addr, state) = server::spawn_ephemeral(data.path(), SECRET).await.expect("server");
    (data, format!("http://{}", addr), state)
}

struct Rig {
    api: Arc<ApiClient>,
    reconciler: Arc<SessionReconciler>,
    sync: Arc<DataSynchronizer>,
    mirror: PersistentMirror,
    _state_dir: TempDir,
}

async fn signed_in_rig(base: &str, handle: &str, ttl: Duration) -> (Rig, Identity) {
    let state_dir = tempfile::tempdir().expect("state dir");
    let rig = rig_with(base, state_dir, ttl);
    let me = rig.reconciler.register(handle, "hunter22", "Syn").await.expect("register");
    (rig, me)
}

fn rig_with(base: &str, state_dir: TempDir, ttl: Duration) -> Rig {
    let api = Arc::new(
        ApiClient::new(&ApiConfig::new(base).with_state_folder(state_dir.path()))
            .expect("api client"),
    );
    let mirror = PersistentMirror::open(state_dir.path()).expect("mirror");
    let (cell, _reader) = identity_cell();
    let reconciler = Arc::new(SessionReconciler::new(
        api.clone(),
        mirror.clone(),
        cell,
        Arc::new(LoggingNavigator),
        ReconcilerConfig::default(),
    ));
    let sync = DataSynchronizer::new(api.clone(), reconciler.clone(), mirror.hint_handle(), SyncConfig { ttl });
    Rig { api, reconciler, sync, mirror, _state_dir: state_dir }
}

async fn seed_journal(api: &ApiClient, uid: &str) {
    api.save_entity(uid, EntityKind::Meals, json!({"name": "oats", "calories": 320, "eatenAt": now_ms()}))
        .await
        .expect("save meal");
    api.save_entity(uid, EntityKind::Sleep, json!({"startedAt": now_ms() - 27_000_000, "endedAt": now_ms(), "quality": 4}))
        .await
        .expect("save sleep");
    api.save_entity(uid, EntityKind::Checkins, json!({"mood": 4, "note": "steady", "loggedAt": now_ms()}))
        .await
        .expect("save checkin");
}

fn outcome_for(rig: &Rig, kind: EntityKind) -> KindOutcome {
    let report = rig.sync.last_report().expect("sync ran");
    report
        .outcomes
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, o)| *o)
        .expect("kind in report")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_sync_within_ttl_reuses_the_cache() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "ttl@example.com", Duration::from_secs(300)).await;
    seed_journal(&rig.api, &me.id).await;

    let before = state.counters.entity_gets_total();
    assert!(rig.sync.sync_data(&me.id).await);
    assert_eq!(state.counters.entity_gets_total(), before + 3, "one fetch per kind");
    for kind in EntityKind::ALL {
        assert!(matches!(outcome_for(&rig, kind), KindOutcome::Fetched(_)));
    }
    let meals_first = rig.sync.snapshot(&me.id, EntityKind::Meals).expect("meals cached");
    assert_eq!(meals_first.len(), 1);
    assert_eq!(meals_first[0].get("name").and_then(|v| v.as_str()), Some("oats"));
    assert!(meals_first[0].get("id").is_some(), "server assigned an id");

    // Same arrays, zero additional fetches.
    assert!(rig.sync.sync_data(&me.id).await);
    assert_eq!(state.counters.entity_gets_total(), before + 3);
    for kind in EntityKind::ALL {
        assert_eq!(outcome_for(&rig, kind), KindOutcome::Hit);
    }
    let meals_second = rig.sync.snapshot(&me.id, EntityKind::Meals).expect("still cached");
    assert_eq!(meals_second, meals_first);

    // the fetch hint trails the synced uid
    assert_eq!(rig.mirror.uid_hint().as_deref(), Some(me.id.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn force_refresh_bypasses_a_fresh_cache() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "force@example.com", Duration::from_secs(300)).await;
    seed_journal(&rig.api, &me.id).await;

    assert!(rig.sync.sync_data(&me.id).await);
    let after_first = state.counters.entity_gets_total();

    assert!(rig.sync.sync_with_options(&me.id, true).await);
    assert_eq!(state.counters.entity_gets_total(), after_first + 3);
    for kind in EntityKind::ALL {
        assert!(matches!(outcome_for(&rig, kind), KindOutcome::Fetched(_)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_ttl_refetches() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "expiry@example.com", Duration::from_millis(50)).await;
    seed_journal(&rig.api, &me.id).await;

    assert!(rig.sync.sync_data(&me.id).await);
    let after_first = state.counters.entity_gets_total();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(rig.sync.sync_data(&me.id).await);
    assert_eq!(state.counters.entity_gets_total(), after_first + 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_syncs_coalesce_into_one_pass() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "race@example.com", Duration::from_secs(300)).await;
    seed_journal(&rig.api, &me.id).await;

    let before = state.counters.entity_gets_total();
    let callers = (0..6).map(|_| rig.sync.sync_data(&me.id));
    let outcomes = futures::future::join_all(callers).await;
    assert!(outcomes.iter().all(|ok| *ok));
    assert_eq!(state.counters.entity_gets_total(), before + 3, "callers shared one pass");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_kind_keeps_previously_cached_data() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "partial@example.com", Duration::from_secs(300)).await;
    seed_journal(&rig.api, &me.id).await;

    assert!(rig.sync.sync_data(&me.id).await);
    let sleep_before = rig.sync.snapshot(&me.id, EntityKind::Sleep).expect("sleep cached");
    assert_eq!(sleep_before.len(), 1);

    // More data lands server-side, then the sleep endpoint starts failing.
    rig.api
        .save_entity(&me.id, EntityKind::Sleep, json!({"startedAt": now_ms() - 1_000_000, "endedAt": now_ms(), "quality": 2}))
        .await
        .expect("save second sleep");
    state.faults.set_fail_kind(EntityKind::Sleep, true);

    let ok = rig.sync.sync_with_options(&me.id, true).await;
    assert!(!ok, "partial failure reports overall failure");
    let report = rig.sync.last_report().expect("report");
    assert!(!report.ok);
    match &report.fault {
        Some(SessionFault::PartialSyncFailure(kinds)) => {
            assert_eq!(kinds.as_slice(), [EntityKind::Sleep].as_slice());
        }
        other => panic!("expected partial sync fault, got {other:?}"),
    }
    assert_eq!(outcome_for(&rig, EntityKind::Sleep), KindOutcome::Failed);
    assert!(matches!(outcome_for(&rig, EntityKind::Meals), KindOutcome::Fetched(_)));
    assert!(matches!(outcome_for(&rig, EntityKind::Checkins), KindOutcome::Fetched(_)));

    // the failed kind still serves yesterday's copy, not an empty list
    let sleep_after = rig.sync.snapshot(&me.id, EntityKind::Sleep).expect("retained");
    assert_eq!(sleep_after, sleep_before);

    // once healthy, a forced pass picks up the second record
    state.faults.set_fail_kind(EntityKind::Sleep, false);
    assert!(rig.sync.sync_with_options(&me.id, true).await);
    let sleep_healed = rig.sync.snapshot(&me.id, EntityKind::Sleep).expect("refetched");
    assert_eq!(sleep_healed.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signed_out_sync_refuses_without_fetching() {
    let (_data, base, state) = start_server().await;
    let state_dir = tempfile::tempdir().expect("state dir");
    let rig = rig_with(&base, state_dir, Duration::from_secs(300));

    let before = state.counters.entity_gets_total();
    assert!(!rig.sync.sync_data("guest").await);
    assert_eq!(state.counters.entity_gets_total(), before);
    let report = rig.sync.last_report().expect("report");
    assert!(matches!(report.fault, Some(SessionFault::AuthExpired)));
    assert!(report.outcomes.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scope_must_match_the_signed_in_user() {
    let (_data, base, state) = start_server().await;
    let (rig, me) = signed_in_rig(&base, "scoped@example.com", Duration::from_secs(300)).await;
    seed_journal(&rig.api, &me.id).await;

    let before = state.counters.entity_gets_total();
    assert!(!rig.sync.sync_data("someone-else").await);
    assert_eq!(state.counters.entity_gets_total(), before, "no fetch for a foreign scope");
    let report = rig.sync.last_report().expect("report");
    assert!(!report.ok);
    assert!(report.fault.is_none());

    // the real scope still works afterwards
    assert!(rig.sync.sync_data(&me.id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_fetch_is_scoped_per_user() {
    let (_data, base, _state) = start_server().await;

    let (rig_a, ana) = signed_in_rig(&base, "ana@example.com", Duration::from_secs(300)).await;
    rig_a
        .api
        .save_entity(&ana.id, EntityKind::Meals, json!({"name": "soup", "eatenAt": now_ms()}))
        .await
        .expect("save");

    let (rig_b, ben) = signed_in_rig(&base, "ben@example.com", Duration::from_secs(300)).await;
    assert!(rig_b.sync.sync_data(&ben.id).await);
    let meals = rig_b.sync.snapshot(&ben.id, EntityKind::Meals).expect("cached");
    assert!(meals.is_empty(), "ben sees his own empty journal, not ana's");

    assert!(rig_a.sync.sync_data(&ana.id).await);
    let meals_a = rig_a.sync.snapshot(&ana.id, EntityKind::Meals).expect("cached");
    assert_eq!(meals_a.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entity_lists_support_etag_revalidation() {
    let (_data, base, _state) = start_server().await;

    let http = reqwest::Client::builder().cookie_store(true).build().expect("client");
    let resp = http
        .post(format!("{base}/register"))
        .json(&json!({"handle": "etag@example.com", "password": "hunter22", "displayName": "E"}))
        .send()
        .await
        .expect("register");
    assert!(resp.status().is_success());
    let v: serde_json::Value = resp.json().await.expect("register body");
    let uid = v["user"]["id"].as_str().expect("uid").to_string();

    let resp = http
        .post(format!("{base}/meals"))
        .json(&json!({"uid": uid, "mealData": {"name": "toast", "eatenAt": now_ms()}}))
        .send()
        .await
        .expect("save");
    assert!(resp.status().is_success());

    let resp = http
        .get(format!("{base}/meals"))
        .query(&[("uid", uid.as_str())])
        .send()
        .await
        .expect("list");
    assert!(resp.status().is_success());
    let tag = resp
        .headers()
        .get("etag")
        .and_then(|h| h.to_str().ok())
        .expect("etag header")
        .to_string();

    let resp = http
        .get(format!("{base}/meals"))
        .query(&[("uid", uid.as_str())])
        .header("If-None-Match", &tag)
        .send()
        .await
        .expect("revalidate");
    assert_eq!(resp.status().as_u16(), 304);

    // a new record changes the tag, so revalidation misses
    let resp = http
        .post(format!("{base}/meals"))
        .json(&json!({"uid": uid, "mealData": {"name": "stew", "eatenAt": now_ms()}}))
        .send()
        .await
        .expect("save second");
    assert!(resp.status().is_success());
    let resp = http
        .get(format!("{base}/meals"))
        .query(&[("uid", uid.as_str())])
        .header("If-None-Match", &tag)
        .send()
        .await
        .expect("changed list");
    assert_eq!(resp.status().as_u16(), 200);
}
