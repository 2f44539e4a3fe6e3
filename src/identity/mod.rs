//! Central identity and session handling for the journal service.
//! Keep the public surface thin and split implementation across sub-modules.

mod profile;
mod session;
mod token;

/// Cookie carrying the signed session token on both ends of the wire.
pub const SESSION_COOKIE: &str = "vitalog_session";

pub use profile::{Identity, ProfileAttrs};
pub use session::{now_ms, IssuedSession, SessionManager, SessionToken, DEFAULT_SESSION_TTL_MS};
pub use token::{TokenClaims, TokenCodec};
