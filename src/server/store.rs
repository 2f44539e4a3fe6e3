//! Journal store
//! -------------
//! In-memory user and record stores backing the HTTP API, persisted as a
//! versioned JSON snapshot written atomically (tmp + rename). Passwords
//! are argon2 PHC strings; accounts are indexed by id and by normalized
//! contact handle.

use crate::error::{AppError, AppResult};
use crate::ident;
use crate::identity::{now_ms, Identity};
use crate::records::{EntityKind, EntityRecord};
use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_FILE: &str = "journal.json";
const MIN_PASSWORD_LEN: usize = 6;

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserAccount {
    identity: Identity,
    password_phc: String,
}

/// On-disk form of the whole store.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    created_ms: i64,
    users: Vec<UserAccount>,
    records: Vec<EntityRecord>,
}

/// Fields a profile update may change. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub timezone: Option<String>,
    pub daily_calorie_goal: Option<u32>,
    pub sleep_goal_hours: Option<f32>,
}

pub struct JournalStore {
    folder: PathBuf,
    users: RwLock<HashMap<String, UserAccount>>,
    /// normalized contact handle -> user id
    handles: RwLock<HashMap<String, String>>,
    records: RwLock<HashMap<(String, EntityKind), Vec<EntityRecord>>>,
    dirty: AtomicBool,
}

/// Thread-safe store handle shared across handlers and background tasks.
#[derive(Clone)]
pub struct SharedJournal(pub Arc<JournalStore>);

impl SharedJournal {
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        Ok(SharedJournal(Arc::new(JournalStore::open(folder)?)))
    }
}

impl JournalStore {
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("creating data folder {}", folder.display()))?;
        let store = Self {
            folder,
            users: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        };
        store.load_snapshot()?;
        info!(
            target: "vitalog::store",
            "journal store open: {} users, {} record lists",
            store.users.read().len(),
            store.records.read().len()
        );
        Ok(store)
    }

    pub fn register(
        &self,
        handle: &str,
        password: &str,
        display_name: &str,
    ) -> AppResult<Identity> {
        if !ident::validate_handle(handle) {
            return Err(AppError::user("bad_handle", "handle must be an email or phone number"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::user("weak_password", "password is too short"));
        }
        let normalized = ident::normalize_handle(handle);
        let display = {
            let d = ident::normalize_display_name(display_name);
            if d.is_empty() { normalized.clone() } else { d }
        };
        let phc = hash_password(password)
            .map_err(|e| AppError::internal("hash_failed".to_string(), e.to_string()))?;

        let mut handles = self.handles.write();
        if handles.contains_key(&normalized) {
            return Err(AppError::conflict("handle_taken", "that handle is already registered"));
        }
        let identity = Identity::new(uuid::Uuid::new_v4().to_string(), &normalized, &display, now_ms());
        handles.insert(normalized, identity.id.clone());
        self.users
            .write()
            .insert(identity.id.clone(), UserAccount { identity: identity.clone(), password_phc: phc });
        self.dirty.store(true, Ordering::Relaxed);
        info!(target: "vitalog::store", "registered uid={} handle={}", identity.id, identity.contact_handle);
        Ok(identity)
    }

    /// Credential check. Unknown handle and wrong password are the same error.
    pub fn authenticate(&self, handle: &str, password: &str) -> AppResult<Identity> {
        let normalized = ident::normalize_handle(handle);
        let uid = self.handles.read().get(&normalized).cloned();
        if let Some(uid) = uid {
            if let Some(account) = self.users.read().get(&uid) {
                if verify_password(&account.password_phc, password) {
                    return Ok(account.identity.clone());
                }
            }
        }
        Err(AppError::auth("invalid_credentials", "handle or password incorrect"))
    }

    pub fn get_user(&self, uid: &str) -> Option<Identity> {
        self.users.read().get(uid).map(|a| a.identity.clone())
    }

    /// Confirm a mirrored identity for the restore path: the account must
    /// exist and its normalized handle must match what the client mirrored.
    pub fn confirm_restore(&self, uid: &str, handle: &str) -> Option<Identity> {
        let account = self.users.read().get(uid).cloned()?;
        if account.identity.contact_handle == ident::normalize_handle(handle) {
            Some(account.identity)
        } else {
            None
        }
    }

    pub fn update_profile(&self, uid: &str, patch: &ProfilePatch) -> AppResult<Identity> {
        let mut users = self.users.write();
        let account = users
            .get_mut(uid)
            .ok_or_else(|| AppError::not_found("no_such_user", "account not found"))?;
        if let Some(name) = &patch.display_name {
            let name = ident::normalize_display_name(name);
            if name.is_empty() {
                return Err(AppError::user("bad_display_name", "display name must not be empty"));
            }
            account.identity.display_name = name;
        }
        if let Some(tz) = &patch.timezone {
            account.identity.attrs.timezone = Some(tz.clone());
        }
        if let Some(goal) = patch.daily_calorie_goal {
            account.identity.attrs.daily_calorie_goal = Some(goal);
        }
        if let Some(hours) = patch.sleep_goal_hours {
            account.identity.attrs.sleep_goal_hours = Some(hours);
        }
        self.dirty.store(true, Ordering::Relaxed);
        Ok(account.identity.clone())
    }

    /// Append one validated record, assigning its server id.
    pub fn append_record(&self, mut rec: EntityRecord) -> AppResult<EntityRecord> {
        rec.validate()?;
        if rec.uid().trim().is_empty() {
            return Err(AppError::user("missing_uid", "record must carry a uid"));
        }
        rec.set_id(uuid::Uuid::new_v4().to_string());
        let key = (rec.uid().to_string(), rec.kind());
        self.records.write().entry(key).or_default().push(rec.clone());
        self.dirty.store(true, Ordering::Relaxed);
        Ok(rec)
    }

    /// Records for one user and kind, ordered by their primary timestamp.
    pub fn list_records(&self, uid: &str, kind: EntityKind) -> Vec<EntityRecord> {
        let mut out = self
            .records
            .read()
            .get(&(uid.to_string(), kind))
            .cloned()
            .unwrap_or_default();
        out.sort_by_key(|r| r.timestamp());
        out
    }

    fn snapshot_path(&self) -> PathBuf {
        self.folder.join(SNAPSHOT_FILE)
    }

    pub fn save_snapshot(&self) -> Result<()> {
        let users: Vec<UserAccount> = self.users.read().values().cloned().collect();
        let records: Vec<EntityRecord> =
            self.records.read().values().flat_map(|v| v.iter().cloned()).collect();
        let snap = Snapshot { version: 1, created_ms: now_ms(), users, records };
        let bytes = serde_json::to_vec_pretty(&snap)?;
        let tmp = self.snapshot_path().with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, self.snapshot_path())?;
        Ok(())
    }

    /// Load the snapshot when present; a missing file is a fresh store.
    fn load_snapshot(&self) -> Result<()> {
        if !self.snapshot_path().exists() {
            return Ok(());
        }
        let bytes = std::fs::read(self.snapshot_path())?;
        let snap: Snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("reading snapshot {}", self.snapshot_path().display()))?;
        let mut users = self.users.write();
        let mut handles = self.handles.write();
        let mut records = self.records.write();
        users.clear();
        handles.clear();
        records.clear();
        for account in snap.users {
            handles.insert(account.identity.contact_handle.clone(), account.identity.id.clone());
            users.insert(account.identity.id.clone(), account);
        }
        for rec in snap.records {
            records.entry((rec.uid().to_string(), rec.kind())).or_default().push(rec);
        }
        Ok(())
    }

    /// Persist when anything changed since the last flush. Used by the
    /// background flush task and on shutdown.
    pub fn flush_if_dirty(&self) -> Result<bool> {
        if self.dirty.swap(false, Ordering::Relaxed) {
            self.save_snapshot()?;
            debug!(target: "vitalog::store", "snapshot flushed");
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn password_hashing_round_trip() {
        let phc = hash_password("hunter2!").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "hunter2!"));
        assert!(!verify_password(&phc, "hunter3!"));
        assert!(!verify_password("not-a-phc-string", "hunter2!"));
    }

    #[test]
    fn register_authenticate_and_duplicate_handle() {
        let dir = tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let ada = store.register("Ada@Example.com", "secret-pw", "Ada").unwrap();
        assert_eq!(ada.contact_handle, "ada@example.com");

        // same handle in a different spelling is a conflict
        let dup = store.register("  ADA@example.COM ", "другой-пароль", "A");
        assert_eq!(dup.unwrap_err().http_status(), 409);

        let who = store.authenticate("ada@example.com", "secret-pw").unwrap();
        assert_eq!(who.id, ada.id);
        assert!(store.authenticate("ada@example.com", "wrong").is_err());
        assert!(store.authenticate("nobody@example.com", "secret-pw").is_err());
    }

    #[test]
    fn restore_confirmation_requires_matching_handle() {
        let dir = tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let u = store.register("415-555-0132", "secret-pw", "G").unwrap();
        assert_eq!(u.contact_handle, "4155550132");

        assert!(store.confirm_restore(&u.id, "+1 (415) 555-0132").is_some());
        assert!(store.confirm_restore(&u.id, "4155550199").is_none());
        assert!(store.confirm_restore("ghost", "4155550132").is_none());
    }

    #[test]
    fn records_survive_snapshot_reload() {
        let dir = tempdir().unwrap();
        let uid;
        {
            let store = JournalStore::open(dir.path()).unwrap();
            let u = store.register("ada@example.com", "secret-pw", "Ada").unwrap();
            uid = u.id.clone();
            let rec = EntityRecord::from_wire(
                EntityKind::Meals,
                json!({"uid": uid, "name": "oats", "eatenAt": 1_700_000_000_000i64}),
            )
            .unwrap();
            let saved = store.append_record(rec).unwrap();
            assert!(saved.id().is_some());
            assert!(store.flush_if_dirty().unwrap());
            // second flush is a no-op
            assert!(!store.flush_if_dirty().unwrap());
        }
        let store = JournalStore::open(dir.path()).unwrap();
        assert!(store.get_user(&uid).is_some());
        let meals = store.list_records(&uid, EntityKind::Meals);
        assert_eq!(meals.len(), 1);
        assert!(store.authenticate("ada@example.com", "secret-pw").is_ok());
    }

    #[test]
    fn list_is_ordered_by_timestamp() {
        let dir = tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        for at in [3_000i64, 1_000, 2_000] {
            let rec = EntityRecord::from_wire(
                EntityKind::Checkins,
                json!({"uid": "u1", "mood": 4, "loggedAt": at}),
            )
            .unwrap();
            store.append_record(rec).unwrap();
        }
        let got: Vec<i64> =
            store.list_records("u1", EntityKind::Checkins).iter().map(|r| r.timestamp()).collect();
        assert_eq!(got, vec![1_000, 2_000, 3_000]);
    }

    #[test]
    fn profile_patch_updates_identity() {
        let dir = tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let u = store.register("ada@example.com", "secret-pw", "Ada").unwrap();
        let patch = ProfilePatch {
            display_name: Some("Ada L".into()),
            timezone: Some("Europe/London".into()),
            daily_calorie_goal: Some(2100),
            sleep_goal_hours: None,
        };
        let updated = store.update_profile(&u.id, &patch).unwrap();
        assert_eq!(updated.display_name, "Ada L");
        assert_eq!(updated.attrs.daily_calorie_goal, Some(2100));
        assert!(updated.attrs.sleep_goal_hours.is_none());
        assert!(store.update_profile("ghost", &patch).is_err());
    }
}
