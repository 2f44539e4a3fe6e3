//! Client-side session and data stack: the reqwest API client, the durable
//! session mirror, the volatile identity cache, the session reconciler that
//! keeps the three tiers agreeing, and the entity data synchronizer.

mod api;
mod current;
mod mirror;
mod reconciler;
mod sync;

pub use api::{ApiClient, ApiConfig, SessionCheck};
pub use current::{identity_cell, IdentityCell, IdentityReader};
pub use mirror::{MirrorBlob, PersistentMirror, UidHint};
pub use reconciler::{
    LoggingNavigator, ReconcilerConfig, SessionPhase, SessionReconciler, ViewNavigator,
};
pub use sync::{DataSynchronizer, KindOutcome, SyncConfig, SyncReport};

use crate::records::EntityKind;

/// Faults the session layer can settle on. Carried in state and reports
/// rather than bubbled as errors: the public contracts stay `bool`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionFault {
    /// Transient transport or parse trouble; retried on the next natural check.
    #[error("session service unreachable: {0}")]
    Network(String),
    /// Authoritative "not authenticated"; clears every tier, not retried.
    #[error("session expired or not authenticated")]
    AuthExpired,
    /// Mirror-seeded restore refused by the server; degrades to anonymous.
    #[error("session restore rejected")]
    RestoreRejected,
    /// Some entity kinds failed to fetch; the rest committed.
    #[error("sync failed for {0:?}")]
    PartialSyncFailure(Vec<EntityKind>),
    /// Consecutive check failures crossed the threshold while signed in.
    #[error("forced logout after {0} consecutive session failures")]
    FailureThreshold(u32),
}
