//! Signed session tokens
//! ---------------------
//! Self-contained credential carried in the session cookie. The payload is
//! JSON `{user, issuedAt, exp}` (epoch milliseconds), base64url encoded and
//! signed with HMAC-SHA256: `<payload_b64>.<sig_b64>`. Verification is
//! stateless apart from the revocation set kept by the session manager.

use crate::error::{AppError, AppResult};
use crate::identity::profile::Identity;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub user: Identity,
    pub issued_at: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn new(user: Identity, now_ms: i64, ttl_ms: i64) -> Self {
        TokenClaims {
            user,
            issued_at: now_ms,
            exp: now_ms + ttl_ms,
        }
    }
}

/// Mints and verifies signed tokens with a single symmetric key.
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
}

impl TokenCodec {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        TokenCodec { key: key.into() }
    }

    /// 256-bit random key, base64url form suitable for an env var.
    pub fn random_secret() -> String {
        let mut buf = [0u8; 32];
        let _ = getrandom::getrandom(&mut buf);
        URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn mint(&self, claims: &TokenClaims) -> AppResult<String> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AppError::internal("token_encode".to_string(), e.to_string()))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let sig = self.sign(payload_b64.as_bytes())?;
        Ok(format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(sig)))
    }

    /// Returns the claims when the signature checks out and the token has not
    /// expired at `now_ms`. Malformed, tampered and expired tokens all map to
    /// None so callers cannot distinguish them.
    pub fn verify(&self, token: &str, now_ms: i64) -> Option<TokenClaims> {
        let (payload_b64, sig_b64) = token.split_once('.')?;
        let sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig).ok()?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let claims: TokenClaims = serde_json::from_slice(&payload).ok()?;
        if claims.exp <= now_ms {
            return None;
        }
        Some(claims)
    }

    fn sign(&self, data: &[u8]) -> AppResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::internal("token_key".to_string(), e.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
