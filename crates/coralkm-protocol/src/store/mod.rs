//! Persistence contracts and in-memory stores
//!
//! Each role owns its rows: the gateway store holds namespace policies,
//! namespaces and backup blobs; the guardian store holds guardian policies,
//! shares and recovery requests. All state lives behind these traits with
//! atomic upsert; there is no module-level mutable state anywhere in the
//! engine.

mod guardian;
mod namespace;

pub use guardian::{GuardianStore, MemoryGuardianStore, StoredRecoveryRequest, StoredShare};
pub use namespace::{BackupBlob, MemoryNamespaceStore, NamespaceStore};

use serde::{Deserialize, Serialize};

/// Access decision recorded against a requester identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    /// The requester may proceed
    Granted,
    /// The requester is refused
    Denied,
}
