//! Gateway handlers: namespace provisioning, backup sync, recovery fan-out

use super::ProtocolEngine;
use crate::mediator::BROADCAST_DID;
use crate::messages::{
    Body, DenyBody, Envelope, NamespaceGrantBody, NamespaceRecoveryRequestBody,
    NamespaceSyncBody, NamespaceSyncResponseBody, SyncOp,
};
use crate::store::PolicyStatus;
use coralkm_core::{encoding, CoralError, Did, Result};
use tracing::{debug, info, warn};

impl ProtocolEngine {
    /// `namespace-request`: consult policy, create and grant, or deny.
    ///
    /// Absent policy defaults to allow (demo behavior; production gates this
    /// on authentication and rate limits).
    pub(crate) async fn handle_namespace_request(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_gateway()?;

        if let Some(PolicyStatus::Denied) = store.get_policy(&envelope.from).await? {
            info!(gateway = %self.did(), wallet = %envelope.from, "namespace request denied by policy");
            let deny = Envelope::new(
                self.effects().gen_uuid(),
                self.did().clone(),
                envelope.from.clone(),
                Body::NamespaceDeny(DenyBody {
                    reason: Some("namespace policy denies this wallet".to_string()),
                }),
            )
            .with_thid(envelope.id);
            return Ok(vec![deny]);
        }

        let namespace = store.create(envelope.from.clone()).await?;
        info!(gateway = %self.did(), wallet = %envelope.from, namespace = %namespace.id, "namespace granted");
        let grant = Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            envelope.from.clone(),
            Body::NamespaceGrant(NamespaceGrantBody { namespace }),
        )
        .with_thid(envelope.id);
        Ok(vec![grant])
    }

    /// `namespace-sync`: store or serve backup bytes.
    pub(crate) async fn handle_namespace_sync(
        &self,
        envelope: &Envelope,
        body: &NamespaceSyncBody,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_gateway()?;
        let response = match body.request {
            SyncOp::Put => {
                let data = body
                    .data
                    .as_deref()
                    .ok_or_else(|| CoralError::invalid_argument("body.data"))?;
                let bytes = encoding::b64url_decode(data)?;
                let hash = store.save_data(&envelope.from, bytes).await?;
                debug!(gateway = %self.did(), wallet = %envelope.from, hash = %hex::encode(hash), "backup stored");
                NamespaceSyncResponseBody {
                    request: SyncOp::Put,
                    hash: Some(hex::encode(hash)),
                    data: None,
                }
            }
            SyncOp::Get => {
                let namespace = match body.recovery_id {
                    // Recovery path: resolve by namespace id. Unauthorized by
                    // design in the demo; production must gate this on a
                    // completed, in-window recovery ceremony for the caller.
                    Some(recovery_id) => store
                        .get_by_id(&recovery_id)
                        .await?
                        .ok_or_else(|| CoralError::namespace_not_found(format!("id {recovery_id}")))?,
                    None => store
                        .get_by_owner(&envelope.from)
                        .await?
                        .ok_or_else(|| {
                            CoralError::namespace_not_found(format!("owner {}", envelope.from))
                        })?,
                };
                let data = store
                    .get_data(&namespace.id)
                    .await?
                    .ok_or_else(|| {
                        CoralError::namespace_not_found(format!("no backup in {}", namespace.id))
                    })?;
                NamespaceSyncResponseBody {
                    request: SyncOp::Get,
                    hash: None,
                    data: Some(encoding::b64url_encode(&data)),
                }
            }
        };

        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            envelope.from.clone(),
            Body::NamespaceSyncResponse(response),
        )
        .with_thid(envelope.id)])
    }

    /// `namespace-recovery-request` addressed to this gateway: fan out to
    /// the guardian population.
    ///
    /// The relayed copy keeps the originator's id and sender so that
    /// `pthid` correlation survives the hop; only the address changes.
    pub(crate) async fn relay_recovery_request(
        &self,
        envelope: &Envelope,
        body: &NamespaceRecoveryRequestBody,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_gateway()?;
        if body.namespace.gateway_did != *self.did() {
            warn!(gateway = %self.did(), "recovery request names a different gateway; dropping");
            return Ok(Vec::new());
        }
        if store.get_by_id(&body.namespace.id).await?.is_none() {
            warn!(gateway = %self.did(), namespace = %body.namespace.id, "recovery request for unknown namespace; dropping");
            return Ok(Vec::new());
        }

        info!(gateway = %self.did(), ceremony = %envelope.id, namespace = %body.namespace.id, "fanning out recovery request");
        let mut relayed = envelope.clone();
        relayed.to = vec![Did::new(BROADCAST_DID)];
        Ok(vec![relayed])
    }
}
