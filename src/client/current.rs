//! Volatile identity cache
//! -----------------------
//! Synchronous in-process read model for "who is signed in right now".
//! Constructed once and injected; the write half stays with the session
//! reconciler while any number of readers hand out the current user without
//! touching the network or disk. The cell carries no TTL: keeping it current
//! is entirely the reconciler's job.

use crate::ident;
use crate::identity::Identity;
use parking_lot::RwLock;
use std::sync::Arc;

/// Build a fresh cache and split it into its write and read halves.
pub fn identity_cell() -> (IdentityCell, IdentityReader) {
    let state = Arc::new(RwLock::new(None));
    (IdentityCell { state: state.clone() }, IdentityReader { state })
}

/// Write half. Deliberately not `Clone`: exactly one component owns it.
pub struct IdentityCell {
    state: Arc<RwLock<Option<Identity>>>,
}

/// Read half, freely clonable.
#[derive(Clone)]
pub struct IdentityReader {
    state: Arc<RwLock<Option<Identity>>>,
}

impl IdentityCell {
    pub fn set(&self, user: Identity) {
        *self.state.write() = Some(user);
    }

    pub fn clear(&self) {
        *self.state.write() = None;
    }

    pub fn current(&self) -> Option<Identity> {
        self.state.read().clone()
    }

    pub fn reader(&self) -> IdentityReader {
        IdentityReader { state: self.state.clone() }
    }
}

impl IdentityReader {
    pub fn current(&self) -> Option<Identity> {
        self.state.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.read().as_ref().map(|u| u.id.clone())
    }

    /// Guest-sentinel fallback for anonymous-safe reads only.
    pub fn user_id_or_guest(&self) -> String {
        ident::user_id_or_guest(self.user_id().as_deref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_some()
    }
}
