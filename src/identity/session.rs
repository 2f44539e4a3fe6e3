use std::collections::{HashMap, HashSet};
use parking_lot::RwLock;
use crate::error::AppResult;
use crate::identity::profile::Identity;
use crate::identity::token::{TokenClaims, TokenCodec};
use crate::tprintln;

/// Sessions live for seven days unless revoked.
pub const DEFAULT_SESSION_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: SessionToken,
    pub claims: TokenClaims,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Issues and validates signed session tokens for one server instance.
///
/// Tokens are self-contained, so validation needs no per-session storage;
/// the manager only tracks revocations (logout, account-wide sign-out) and
/// an index from user id to outstanding tokens.
pub struct SessionManager {
    codec: TokenCodec,
    pub ttl_ms: i64,
    revoked: RwLock<HashSet<String>>,
    user_index: RwLock<HashMap<String, HashSet<String>>>,
}

impl SessionManager {
    pub fn new(codec: TokenCodec) -> Self {
        Self {
            codec,
            ttl_ms: DEFAULT_SESSION_TTL_MS,
            revoked: RwLock::new(HashSet::new()),
            user_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn issue(&self, user: Identity) -> AppResult<IssuedSession> {
        let claims = TokenClaims::new(user.clone(), now_ms(), self.ttl_ms);
        let token = self.codec.mint(&claims)?;
        {
            let mut uidx = self.user_index.write();
            let set = uidx.entry(user.id.clone()).or_insert_with(HashSet::new);
            set.insert(token.clone());
        }
        tprintln!("session.issue user={} ttl_ms={}", user.id, self.ttl_ms);
        Ok(IssuedSession { token, claims })
    }

    pub fn validate(&self, token: &str) -> Option<Identity> {
        if self.revoked.read().contains(token) {
            return None;
        }
        let claims = self.codec.verify(token, now_ms())?;
        Some(claims.user)
    }

    pub fn logout(&self, token: &str) -> bool {
        // Revoke regardless of expiry so a replayed cookie stays dead.
        let newly = self.revoked.write().insert(token.to_string());
        if let Some(claims) = self.codec.verify(token, now_ms()) {
            let mut idx = self.user_index.write();
            if let Some(set) = idx.get_mut(&claims.user.id) {
                set.remove(token);
            }
        }
        newly
    }

    pub fn revoke_user(&self, user_id: &str) -> usize {
        let tokens = match self.user_index.write().remove(user_id) {
            Some(t) => t,
            None => return 0,
        };
        let count = tokens.len();
        let mut r = self.revoked.write();
        for t in tokens {
            r.insert(t);
        }
        tprintln!("session.revoke user={} count={}", user_id, count);
        count
    }
}
