//! Gateway-side persistence: namespace policies, namespaces, backup blobs

use super::PolicyStatus;
use async_trait::async_trait;
use coralkm_core::{CoralError, Did, Effects, Namespace, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Encrypted backup held by a namespace. Replaced atomically on PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupBlob {
    /// Ciphertext bytes exactly as received
    pub data: Vec<u8>,
    /// When the blob was last written
    pub synced_at: Option<u64>,
    /// SHA-256 over `data`
    pub hash: [u8; 32],
}

/// Persistence contract for the gateway role.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Access decision for a requester, if one was recorded.
    async fn get_policy(&self, requester: &Did) -> Result<Option<PolicyStatus>>;

    /// Record an access decision.
    async fn set_policy(&self, requester: Did, status: PolicyStatus) -> Result<()>;

    /// Drop a recorded decision.
    async fn remove_policy(&self, requester: &Did) -> Result<()>;

    /// Create a namespace for `owner`, or return the existing one.
    async fn create(&self, owner: Did) -> Result<Namespace>;

    /// Look up a namespace by id.
    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Namespace>>;

    /// Look up a namespace by owner.
    async fn get_by_owner(&self, owner: &Did) -> Result<Option<Namespace>>;

    /// Assign a fresh id to the owner's namespace, keeping its data.
    async fn rotate_id(&self, owner: &Did) -> Result<Namespace>;

    /// Store backup bytes for the owner's namespace.
    ///
    /// Atomic with respect to readers; returns the SHA-256 of exactly the
    /// stored bytes.
    async fn save_data(&self, owner: &Did, data: Vec<u8>) -> Result<[u8; 32]>;

    /// Read backup bytes by namespace id.
    async fn get_data(&self, id: &Uuid) -> Result<Option<Vec<u8>>>;

    /// Destroy a namespace and its data.
    async fn delete(&self, id: &Uuid) -> Result<()>;
}

struct NamespaceRow {
    owner: Did,
    blob: Option<BackupBlob>,
}

struct NamespaceTables {
    policies: HashMap<Did, PolicyStatus>,
    namespaces: HashMap<Uuid, NamespaceRow>,
    by_owner: HashMap<Did, Uuid>,
}

/// In-memory gateway store.
pub struct MemoryNamespaceStore {
    gateway_did: Did,
    effects: Effects,
    tables: async_lock::RwLock<NamespaceTables>,
}

impl MemoryNamespaceStore {
    /// Empty store for the given gateway identity.
    pub fn new(gateway_did: Did, effects: Effects) -> Self {
        MemoryNamespaceStore {
            gateway_did,
            effects,
            tables: async_lock::RwLock::new(NamespaceTables {
                policies: HashMap::new(),
                namespaces: HashMap::new(),
                by_owner: HashMap::new(),
            }),
        }
    }

    fn namespace(&self, id: Uuid) -> Namespace {
        Namespace::new(id, self.gateway_did.clone())
    }
}

#[async_trait]
impl NamespaceStore for MemoryNamespaceStore {
    async fn get_policy(&self, requester: &Did) -> Result<Option<PolicyStatus>> {
        Ok(self.tables.read().await.policies.get(requester).copied())
    }

    async fn set_policy(&self, requester: Did, status: PolicyStatus) -> Result<()> {
        self.tables.write().await.policies.insert(requester, status);
        Ok(())
    }

    async fn remove_policy(&self, requester: &Did) -> Result<()> {
        self.tables.write().await.policies.remove(requester);
        Ok(())
    }

    async fn create(&self, owner: Did) -> Result<Namespace> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.by_owner.get(&owner) {
            return Ok(self.namespace(*existing));
        }
        let id = self.effects.gen_uuid();
        tables.namespaces.insert(
            id,
            NamespaceRow {
                owner: owner.clone(),
                blob: None,
            },
        );
        tables.by_owner.insert(owner, id);
        Ok(self.namespace(id))
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<Namespace>> {
        let tables = self.tables.read().await;
        Ok(tables.namespaces.contains_key(id).then(|| self.namespace(*id)))
    }

    async fn get_by_owner(&self, owner: &Did) -> Result<Option<Namespace>> {
        let tables = self.tables.read().await;
        Ok(tables.by_owner.get(owner).map(|id| self.namespace(*id)))
    }

    async fn rotate_id(&self, owner: &Did) -> Result<Namespace> {
        let mut tables = self.tables.write().await;
        let old_id = *tables
            .by_owner
            .get(owner)
            .ok_or_else(|| CoralError::namespace_not_found(format!("owner {owner}")))?;
        let row = tables
            .namespaces
            .remove(&old_id)
            .ok_or_else(|| CoralError::internal("owner index out of sync"))?;
        let new_id = self.effects.gen_uuid();
        tables.namespaces.insert(new_id, row);
        tables.by_owner.insert(owner.clone(), new_id);
        Ok(self.namespace(new_id))
    }

    async fn save_data(&self, owner: &Did, data: Vec<u8>) -> Result<[u8; 32]> {
        let mut tables = self.tables.write().await;
        let id = *tables
            .by_owner
            .get(owner)
            .ok_or_else(|| CoralError::namespace_not_found(format!("owner {owner}")))?;
        let synced_at = self.effects.now()?;
        let hash: [u8; 32] = Sha256::digest(&data).into();
        let row = tables
            .namespaces
            .get_mut(&id)
            .ok_or_else(|| CoralError::internal("owner index out of sync"))?;
        row.blob = Some(BackupBlob {
            data,
            synced_at: Some(synced_at),
            hash,
        });
        Ok(hash)
    }

    async fn get_data(&self, id: &Uuid) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .namespaces
            .get(id)
            .and_then(|row| row.blob.as_ref())
            .map(|blob| blob.data.clone()))
    }

    async fn delete(&self, id: &Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.namespaces.remove(id) {
            tables.by_owner.remove(&row.owner);
        }
        Ok(())
    }
}
