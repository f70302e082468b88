//! Guardian-side persistence: policies, shares, recovery requests

use super::PolicyStatus;
use async_trait::async_trait;
use coralkm_core::{CoralError, Did, Namespace, Result};
use std::collections::HashMap;
use uuid::Uuid;

/// A threshold share held on behalf of a wallet.
///
/// Exactly one live share per `(gateway, namespace id)` key; re-splits
/// replace it in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredShare {
    /// The wallet the share belongs to
    pub owner: Did,
    /// The namespace the share protects
    pub namespace: Namespace,
    /// Reconstruction threshold at the time of the split
    pub threshold: u8,
    /// Share wire bytes
    pub share: Vec<u8>,
    /// Last upsert time
    pub updated_at: u64,
}

/// An in-flight recovery ceremony as seen by a guardian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecoveryRequest {
    /// Ceremony id (the recovery request's message id)
    pub id: Uuid,
    /// The device that asked for recovery
    pub device_did: Did,
    /// The namespace being recovered
    pub namespace: Namespace,
    /// The challenge issued for this ceremony
    pub challenge_id: Uuid,
    /// When the request was stored
    pub created_at: u64,
    /// Hard deadline; responses after this are dropped
    pub expires_at: u64,
}

impl StoredRecoveryRequest {
    /// Whether the request is past its deadline at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Persistence contract for the guardian role.
#[async_trait]
pub trait GuardianStore: Send + Sync {
    /// Access decision for a requester, if one was recorded.
    async fn get_policy(&self, requester: &Did) -> Result<Option<PolicyStatus>>;

    /// Record an access decision.
    async fn set_policy(&self, requester: Did, status: PolicyStatus) -> Result<()>;

    /// Drop a recorded decision.
    async fn remove_policy(&self, requester: &Did) -> Result<()>;

    /// Whether this party holds a share for the namespace.
    async fn is_guardian(&self, gateway: &Did, namespace_id: &Uuid) -> Result<bool>;

    /// Upsert a share keyed by `(gateway, namespace id)`.
    ///
    /// The owner must hold a `Granted` policy; otherwise `PolicyNotGranted`.
    async fn save_share(&self, share: StoredShare) -> Result<()>;

    /// Read a share.
    async fn get_share(&self, gateway: &Did, namespace_id: &Uuid) -> Result<Option<StoredShare>>;

    /// All held shares.
    async fn list_shares(&self) -> Result<Vec<StoredShare>>;

    /// Delete one share.
    async fn delete_share(&self, gateway: &Did, namespace_id: &Uuid) -> Result<()>;

    /// Revoke a wallet: set its policy to `Denied` and delete all of its
    /// shares in one transaction. Returns the number of shares deleted.
    async fn revoke_guardianship(&self, owner: &Did) -> Result<usize>;

    /// Persist a recovery request keyed by ceremony id.
    async fn save_recovery_request(&self, request: StoredRecoveryRequest) -> Result<()>;

    /// Read a recovery request.
    async fn get_recovery_request(&self, id: &Uuid) -> Result<Option<StoredRecoveryRequest>>;

    /// Delete a recovery request.
    async fn delete_recovery_request(&self, id: &Uuid) -> Result<()>;

    /// Drop every request past its deadline. Returns how many were purged.
    async fn purge_expired(&self, now: u64) -> Result<usize>;
}

struct GuardianTables {
    policies: HashMap<Did, PolicyStatus>,
    shares: HashMap<(Did, Uuid), StoredShare>,
    recovery_requests: HashMap<Uuid, StoredRecoveryRequest>,
}

/// In-memory guardian store.
pub struct MemoryGuardianStore {
    tables: async_lock::RwLock<GuardianTables>,
}

impl MemoryGuardianStore {
    /// Empty store.
    pub fn new() -> Self {
        MemoryGuardianStore {
            tables: async_lock::RwLock::new(GuardianTables {
                policies: HashMap::new(),
                shares: HashMap::new(),
                recovery_requests: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryGuardianStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuardianStore for MemoryGuardianStore {
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

    async fn is_guardian(&self, gateway: &Did, namespace_id: &Uuid) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .shares
            .contains_key(&(gateway.clone(), *namespace_id)))
    }

    async fn save_share(&self, share: StoredShare) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.policies.get(&share.owner) {
            Some(PolicyStatus::Granted) => {}
            _ => {
                return Err(CoralError::policy_not_granted(share.owner.to_string()));
            }
        }
        let key = (share.namespace.gateway_did.clone(), share.namespace.id);
        tables.shares.insert(key, share);
        Ok(())
    }

    async fn get_share(&self, gateway: &Did, namespace_id: &Uuid) -> Result<Option<StoredShare>> {
        let tables = self.tables.read().await;
        Ok(tables.shares.get(&(gateway.clone(), *namespace_id)).cloned())
    }

    async fn list_shares(&self) -> Result<Vec<StoredShare>> {
        Ok(self.tables.read().await.shares.values().cloned().collect())
    }

    async fn delete_share(&self, gateway: &Did, namespace_id: &Uuid) -> Result<()> {
        self.tables
            .write()
            .await
            .shares
            .remove(&(gateway.clone(), *namespace_id));
        Ok(())
    }

    async fn revoke_guardianship(&self, owner: &Did) -> Result<usize> {
        // Policy flip and share deletion under one write lock
        let mut tables = self.tables.write().await;
        tables
            .policies
            .insert(owner.clone(), PolicyStatus::Denied);
        let before = tables.shares.len();
        tables.shares.retain(|_, share| &share.owner != owner);
        Ok(before - tables.shares.len())
    }

    async fn save_recovery_request(&self, request: StoredRecoveryRequest) -> Result<()> {
        self.tables
            .write()
            .await
            .recovery_requests
            .insert(request.id, request);
        Ok(())
    }

    async fn get_recovery_request(&self, id: &Uuid) -> Result<Option<StoredRecoveryRequest>> {
        Ok(self.tables.read().await.recovery_requests.get(id).cloned())
    }

    async fn delete_recovery_request(&self, id: &Uuid) -> Result<()> {
        self.tables.write().await.recovery_requests.remove(id);
        Ok(())
    }

    async fn purge_expired(&self, now: u64) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let before = tables.recovery_requests.len();
        tables
            .recovery_requests
            .retain(|_, request| !request.is_expired(now));
        Ok(before - tables.recovery_requests.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Did {
        Did::new("did:coral:wallet")
    }

    fn namespace() -> Namespace {
        Namespace::new(Uuid::from_u128(1), Did::new("did:coral:gw"))
    }

    fn share(owner: Did, threshold: u8) -> StoredShare {
        StoredShare {
            owner,
            namespace: namespace(),
            threshold,
            share: vec![1, 2, 3],
            updated_at: 100,
        }
    }

    #[tokio::test]
    async fn save_share_requires_granted_policy() {
        let store = MemoryGuardianStore::new();
        let err = store.save_share(share(wallet(), 2)).await.unwrap_err();
        assert!(matches!(err, CoralError::PolicyNotGranted { .. }));

        store
            .set_policy(wallet(), PolicyStatus::Granted)
            .await
            .unwrap();
        store.save_share(share(wallet(), 2)).await.unwrap();
        assert!(store
            .is_guardian(&namespace().gateway_did, &namespace().id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn save_share_upserts_by_namespace_key() {
        let store = MemoryGuardianStore::new();
        store
            .set_policy(wallet(), PolicyStatus::Granted)
            .await
            .unwrap();
        store.save_share(share(wallet(), 2)).await.unwrap();
        store.save_share(share(wallet(), 3)).await.unwrap();

        let shares = store.list_shares().await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].threshold, 3);
    }

    #[tokio::test]
    async fn revoke_is_transactional() {
        let store = MemoryGuardianStore::new();
        store
            .set_policy(wallet(), PolicyStatus::Granted)
            .await
            .unwrap();
        store.save_share(share(wallet(), 2)).await.unwrap();

        let deleted = store.revoke_guardianship(&wallet()).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            store.get_policy(&wallet()).await.unwrap(),
            Some(PolicyStatus::Denied)
        );
        assert!(store.list_shares().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_share_clears_one_key() {
        let store = MemoryGuardianStore::new();
        store
            .set_policy(wallet(), PolicyStatus::Granted)
            .await
            .unwrap();
        store.save_share(share(wallet(), 2)).await.unwrap();

        let ns = namespace();
        store.delete_share(&ns.gateway_did, &ns.id).await.unwrap();
        assert!(!store.is_guardian(&ns.gateway_did, &ns.id).await.unwrap());
        // Policy survives a share deletion
        assert_eq!(
            store.get_policy(&wallet()).await.unwrap(),
            Some(PolicyStatus::Granted)
        );
    }

    #[tokio::test]
    async fn remove_policy_forgets_the_decision() {
        let store = MemoryGuardianStore::new();
        store
            .set_policy(wallet(), PolicyStatus::Denied)
            .await
            .unwrap();
        store.remove_policy(&wallet()).await.unwrap();
        assert_eq!(store.get_policy(&wallet()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_requests() {
        let store = MemoryGuardianStore::new();
        let fresh = StoredRecoveryRequest {
            id: Uuid::from_u128(1),
            device_did: wallet(),
            namespace: namespace(),
            challenge_id: Uuid::from_u128(10),
            created_at: 0,
            expires_at: 200,
        };
        let stale = StoredRecoveryRequest {
            id: Uuid::from_u128(2),
            expires_at: 50,
            ..fresh.clone()
        };
        store.save_recovery_request(fresh.clone()).await.unwrap();
        store.save_recovery_request(stale).await.unwrap();

        assert_eq!(store.purge_expired(100).await.unwrap(), 1);
        assert_eq!(
            store.get_recovery_request(&fresh.id).await.unwrap(),
            Some(fresh)
        );
        assert_eq!(
            store.get_recovery_request(&Uuid::from_u128(2)).await.unwrap(),
            None
        );
    }
}
