//! Persistent session mirror
//! -------------------------
//! Durable client-side copy of the last known identity and auth flag, stored
//! as one JSON blob (`session.json`) plus a scalar last-known-uid hint
//! (`last_user_id`). The blob only ever seeds a restore attempt; it never
//! authorizes anything by itself. Writes go through a tmp file and rename so
//! a crash cannot leave a torn blob behind.

use crate::identity::Identity;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BLOB_FILE: &str = "session.json";
const HINT_FILE: &str = "last_user_id";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorBlob {
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub current_user: Option<Identity>,
}

struct MirrorInner {
    folder: PathBuf,
    blob: Mutex<MirrorBlob>,
    hint: Mutex<Option<String>>,
}

/// Full read/write handle. Held by the reconciler; everything else gets a
/// [`UidHint`] or nothing.
#[derive(Clone)]
pub struct PersistentMirror {
    inner: Arc<MirrorInner>,
}

/// Write access to the last-known-uid hint only. The auth flag and user blob
/// are unreachable through this handle.
#[derive(Clone)]
pub struct UidHint {
    inner: Arc<MirrorInner>,
}

impl PersistentMirror {
    /// Open (or initialize) the mirror under the given state folder.
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder)
            .with_context(|| format!("creating state folder {}", folder.display()))?;
        let blob = match fs::read_to_string(folder.join(BLOB_FILE)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => MirrorBlob::default(),
        };
        let hint = match fs::read_to_string(folder.join(HINT_FILE)) {
            Ok(raw) => {
                let t = raw.trim().to_string();
                if t.is_empty() { None } else { Some(t) }
            }
            Err(_) => None,
        };
        Ok(Self { inner: Arc::new(MirrorInner { folder, blob: Mutex::new(blob), hint: Mutex::new(hint) }) })
    }

    pub fn snapshot(&self) -> MirrorBlob {
        self.inner.blob.lock().clone()
    }

    pub fn uid_hint(&self) -> Option<String> {
        self.inner.hint.lock().clone()
    }

    /// Seed the mirror as authenticated and record the uid hint alongside.
    pub fn set_authenticated(&self, user: &Identity) -> Result<()> {
        {
            let mut blob = self.inner.blob.lock();
            blob.is_authenticated = true;
            blob.current_user = Some(user.clone());
            self.inner.write_blob(&blob)?;
        }
        self.inner.write_hint(Some(&user.id))?;
        debug!(target: "vitalog::client", "mirror seeded authenticated uid={}", user.id);
        Ok(())
    }

    /// Clear the auth flag and user blob. The uid hint is deliberately
    /// retained so an anonymous-safe surface can still scope reads.
    pub fn clear_auth(&self) -> Result<()> {
        let mut blob = self.inner.blob.lock();
        blob.is_authenticated = false;
        blob.current_user = None;
        self.inner.write_blob(&blob)?;
        debug!(target: "vitalog::client", "mirror cleared (hint retained)");
        Ok(())
    }

    pub fn hint_handle(&self) -> UidHint {
        UidHint { inner: self.inner.clone() }
    }
}

impl UidHint {
    pub fn get(&self) -> Option<String> {
        self.inner.hint.lock().clone()
    }

    pub fn set(&self, uid: &str) -> Result<()> {
        self.inner.write_hint(Some(uid))
    }
}

impl MirrorInner {
    fn write_blob(&self, blob: &MirrorBlob) -> Result<()> {
        let path = self.folder.join(BLOB_FILE);
        let tmp = self.folder.join(format!("{BLOB_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(blob)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    fn write_hint(&self, uid: Option<&str>) -> Result<()> {
        {
            let mut hint = self.hint.lock();
            *hint = uid.map(|s| s.to_string());
        }
        let path = self.folder.join(HINT_FILE);
        let tmp = self.folder.join(format!("{HINT_FILE}.tmp"));
        fs::write(&tmp, uid.unwrap_or_default()).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user() -> Identity {
        Identity::new("u-1", "ada@example.com", "Ada", 1_700_000_000_000)
    }

    #[test]
    fn blob_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let m = PersistentMirror::open(dir.path()).unwrap();
            m.set_authenticated(&user()).unwrap();
        }
        let m = PersistentMirror::open(dir.path()).unwrap();
        let snap = m.snapshot();
        assert!(snap.is_authenticated);
        assert_eq!(snap.current_user.unwrap().id, "u-1");
        assert_eq!(m.uid_hint().as_deref(), Some("u-1"));
    }

    #[test]
    fn clear_keeps_hint() {
        let dir = tempdir().unwrap();
        let m = PersistentMirror::open(dir.path()).unwrap();
        m.set_authenticated(&user()).unwrap();
        m.clear_auth().unwrap();

        let snap = m.snapshot();
        assert!(!snap.is_authenticated);
        assert!(snap.current_user.is_none());
        assert_eq!(m.uid_hint().as_deref(), Some("u-1"));

        // and the retained hint is durable
        let re = PersistentMirror::open(dir.path()).unwrap();
        assert!(!re.snapshot().is_authenticated);
        assert_eq!(re.uid_hint().as_deref(), Some("u-1"));
    }

    #[test]
    fn hint_handle_cannot_touch_auth() {
        let dir = tempdir().unwrap();
        let m = PersistentMirror::open(dir.path()).unwrap();
        m.set_authenticated(&user()).unwrap();

        let h = m.hint_handle();
        h.set("u-9").unwrap();
        assert_eq!(m.uid_hint().as_deref(), Some("u-9"));
        // auth flag untouched by hint writes
        assert!(m.snapshot().is_authenticated);
    }

    #[test]
    fn corrupt_blob_degrades_to_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(BLOB_FILE), b"{not json").unwrap();
        let m = PersistentMirror::open(dir.path()).unwrap();
        assert_eq!(m.snapshot(), MirrorBlob::default());
    }
}
