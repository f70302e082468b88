//! End-to-end protocol scenarios over a wired in-memory network
//!
//! Provisioning, backup sync with hash verification, guardian membership
//! changes with re-splits, and the multi-party recovery ceremony, all driven
//! through the wallet facade with deterministic effects.

use coralkm_core::{CoralError, Did, Namespace};
use coralkm_crypto::{aead, sss, CipherEnvelope};
use coralkm_protocol::store::{GuardianStore, NamespaceStore};
use coralkm_testkit::TestNetwork;
use coralkm_wallet::{WalletConfig, WalletEvent};

async fn provision(net: &TestNetwork) -> Namespace {
    net.wallet
        .request_namespace(&net.gateway_did)
        .await
        .unwrap();
    net.settle().await;
    net.wallet.namespace().await.expect("namespace granted")
}

fn has_event(events: &[WalletEvent], predicate: impl Fn(&WalletEvent) -> bool) -> bool {
    events.iter().any(predicate)
}

#[tokio::test]
async fn provision_put_and_verify_hash() {
    let net = TestNetwork::new(0).await;
    let namespace = provision(&net).await;
    assert_eq!(namespace.gateway_did, net.gateway_did);

    net.wallet.sync_backup().await.unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(
        has_event(&events, |e| matches!(e, WalletEvent::BackupSynced { .. })),
        "gateway hash must match the client-side hash: {events:?}"
    );

    // The stored blob is the namespace-bound ciphertext of the backup
    let data = net
        .gateway_store
        .get_data(&namespace.id)
        .await
        .unwrap()
        .expect("blob stored");
    let envelope = CipherEnvelope::from_bytes(&data).unwrap();
    let dek = net.wallet.dek().await.unwrap();
    let plaintext = aead::decrypt(&dek, &envelope, Some(&namespace)).unwrap();
    assert!(!plaintext.is_empty());
}

#[tokio::test]
async fn backup_cannot_be_opened_under_another_namespace() {
    let net = TestNetwork::new(0).await;
    let namespace = provision(&net).await;
    net.wallet.sync_backup().await.unwrap();
    net.settle().await;

    let data = net
        .gateway_store
        .get_data(&namespace.id)
        .await
        .unwrap()
        .unwrap();
    let envelope = CipherEnvelope::from_bytes(&data).unwrap();
    let dek = net.wallet.dek().await.unwrap();

    let other = Namespace::new(net.effects.gen_uuid(), net.gateway_did.clone());
    assert_eq!(
        aead::decrypt(&dek, &envelope, Some(&other)),
        Err(CoralError::AeadAadMismatch)
    );
}

#[tokio::test]
async fn two_guardians_each_hold_one_share_at_threshold_two() {
    let net = TestNetwork::new(2).await;
    let namespace = provision(&net).await;

    net.wallet.add_guardian(&net.guardians[0].did).await.unwrap();
    net.wallet.add_guardian(&net.guardians[1].did).await.unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::SharesDistributed { threshold: 2, guardians } if guardians.len() == 2
    )));
    assert!(
        has_event(&events, |e| matches!(e, WalletEvent::BackupSynced { .. })),
        "distribution must be followed by a backup sync"
    );

    for guardian in &net.guardians {
        let shares = guardian.store.list_shares().await.unwrap();
        assert_eq!(shares.len(), 1, "exactly one live share per guardian");
        assert_eq!(shares[0].threshold, 2);
        assert_eq!(shares[0].namespace, namespace);
    }
    assert_eq!(net.wallet.share_records().await.len(), 2);
}

#[tokio::test]
async fn resplit_on_add_lets_any_two_of_three_recover() {
    let net = TestNetwork::new(3).await;
    provision(&net).await;

    net.wallet.add_guardian(&net.guardians[0].did).await.unwrap();
    net.wallet.add_guardian(&net.guardians[1].did).await.unwrap();
    net.settle().await;
    net.wallet.take_events().await;

    // Third guardian joins; everyone gets fresh shares with n=3, t=2
    net.wallet.add_guardian(&net.guardians[2].did).await.unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::SharesDistributed { threshold: 2, guardians } if guardians.len() == 3
    )));

    let dek = net.wallet.dek().await.unwrap();
    let held: Vec<sss::SecretShare> = {
        let mut held = Vec::new();
        for guardian in &net.guardians {
            let shares = guardian.store.list_shares().await.unwrap();
            assert_eq!(shares.len(), 1);
            held.push(sss::SecretShare::from_bytes(&shares[0].share).unwrap());
        }
        held
    };
    // Any two of the three current shares reconstruct the DEK
    for pair in [[0, 1], [0, 2], [1, 2]] {
        let subset = [held[pair[0]].clone(), held[pair[1]].clone()];
        assert_eq!(
            sss::combine(&subset).unwrap().as_slice(),
            dek.as_bytes().as_slice()
        );
    }
}

#[tokio::test]
async fn removal_revokes_shares_and_resplits_the_rest() {
    let net = TestNetwork::new(3).await;
    provision(&net).await;
    for guardian in &net.guardians {
        net.wallet.add_guardian(&guardian.did).await.unwrap();
    }
    net.settle().await;
    net.wallet.take_events().await;

    net.wallet
        .remove_guardian(&net.guardians[0].did)
        .await
        .unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::GuardianRemoved { guardian } if guardian == &net.guardians[0].did
    )));
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::SharesDistributed { threshold: 2, guardians } if guardians.len() == 2
    )));

    assert!(net.guardians[0].store.list_shares().await.unwrap().is_empty());
    assert_eq!(net.guardians[1].store.list_shares().await.unwrap().len(), 1);
    assert_eq!(net.wallet.share_records().await.len(), 2);
}

#[tokio::test]
async fn recovery_happy_path_restores_dek_and_backup() {
    let net = TestNetwork::new(2).await;
    let namespace = provision(&net).await;
    net.wallet.add_guardian(&net.guardians[0].did).await.unwrap();
    net.wallet.add_guardian(&net.guardians[1].did).await.unwrap();
    net.settle().await;
    net.wallet.take_events().await;

    // A new device knows its namespace but has no key material
    let recovered_wallet = net.add_wallet("did:coral:new-device", None).await;
    recovered_wallet
        .start_recovery(namespace.clone())
        .await
        .unwrap();
    net.settle().await;

    let events = recovered_wallet.take_events().await;
    let restored = events
        .iter()
        .find_map(|e| match e {
            WalletEvent::RecoveryRestored { backup, .. } => Some(backup.clone()),
            _ => None,
        })
        .expect("recovery should restore the backup");

    assert_eq!(restored.identifiers, vec![Did::new("did:coral:wallet")]);
    assert_eq!(restored.shares.len(), 2);
    assert_eq!(
        recovered_wallet.dek().await.unwrap(),
        net.wallet.dek().await.unwrap(),
        "the reconstructed DEK matches the original"
    );
    assert_eq!(recovered_wallet.namespace().await, Some(namespace));
    assert!(!recovered_wallet.recovery_in_flight().await);
}

#[tokio::test]
async fn probing_a_namespace_nobody_guards_gets_silence() {
    // The namespace exists, so the gateway fans the request out, but no
    // guardian holds a share for it. Not one of them may answer; a reply
    // would let a prober enumerate guardians.
    let net = TestNetwork::new(2).await;
    let namespace = provision(&net).await;

    let prober = net.add_wallet("did:coral:prober", None).await;
    prober.start_recovery(namespace).await.unwrap();
    net.settle().await;

    let events = prober.take_events().await;
    assert!(
        events.is_empty(),
        "no challenge, release or report may reach the prober: {events:?}"
    );
    assert!(prober.recovery_in_flight().await, "ceremony just dangles");
}

#[tokio::test]
async fn expired_recovery_never_releases_shares() {
    let net = TestNetwork::new(2).await;
    let namespace = provision(&net).await;
    net.wallet.add_guardian(&net.guardians[0].did).await.unwrap();
    net.wallet.add_guardian(&net.guardians[1].did).await.unwrap();
    net.settle().await;

    let recovered_wallet = net
        .add_wallet_with_config(
            "did:coral:new-device",
            None,
            WalletConfig {
                recovery_ttl_secs: 60,
                ..WalletConfig::default()
            },
        )
        .await;
    recovered_wallet.start_recovery(namespace).await.unwrap();

    // Deliver the request to the gateway, then the fan-out to the guardians;
    // both challenges are now queued for the device.
    assert!(net.mediator.step().await.unwrap());
    assert!(net.mediator.step().await.unwrap());

    // The ceremony deadline passes before the device answers
    net.effects.advance(61).unwrap();
    net.settle().await;

    let events = recovered_wallet.take_events().await;
    assert!(
        !has_event(&events, |e| matches!(e, WalletEvent::RecoveryRestored { .. })),
        "expired ceremony must not restore"
    );
    assert!(recovered_wallet.dek().await.is_none());
    for guardian in &net.guardians {
        assert_eq!(
            guardian.store.purge_expired(net.effects.now().unwrap()).await.unwrap(),
            0,
            "guardians must have purged the expired request already"
        );
    }

    // The wallet side surfaces the expiry as an event
    recovered_wallet.expire_stale().await.unwrap();
    let events = recovered_wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::RecoveryExpired { .. }
    )));
}

#[tokio::test]
async fn single_guardian_is_never_split() {
    let net = TestNetwork::new(1).await;
    provision(&net).await;
    net.wallet.add_guardian(&net.guardians[0].did).await.unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::InsufficientGuardians { count: 1 }
    )));
    assert!(net.guardians[0].store.list_shares().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_requests_surface_as_problem_report_events() {
    use coralkm_protocol::codec;
    use coralkm_protocol::messages::{Body, Envelope, NamespaceSyncBody, SyncOp};
    use coralkm_protocol::Mediator;

    let net = TestNetwork::new(0).await;
    provision(&net).await;

    // GET before any backup was PUT: the gateway reports namespace-not-found
    // and the wallet surfaces it as an event on the offending thread.
    let get = Envelope::new(
        net.effects.gen_uuid(),
        Did::new(coralkm_testkit::WALLET_DID),
        net.gateway_did.clone(),
        Body::NamespaceSync(NamespaceSyncBody {
            request: SyncOp::Get,
            data: None,
            recovery_id: None,
        }),
    );
    net.mediator.send(codec::encode(&get)).await.unwrap();
    net.settle().await;

    let events = net.wallet.take_events().await;
    assert!(has_event(&events, |e| matches!(
        e,
        WalletEvent::ProblemReported { code, .. } if code == "namespace-not-found"
    )));
}
