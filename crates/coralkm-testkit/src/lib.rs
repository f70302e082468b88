//! # CoralKM Testkit - wired protocol networks for tests
//!
//! Builds a complete in-memory CoralKM deployment: one gateway, a
//! configurable set of guardians, and a wallet, all registered on the same
//! [`InMemoryMediator`] with shared deterministic effects. Integration tests
//! drive the wallet facade and pump the mediator.

#![forbid(unsafe_code)]

use coralkm_core::{Did, Effects};
use coralkm_crypto::Dek;
use coralkm_protocol::store::{
    GuardianStore, MemoryGuardianStore, MemoryNamespaceStore, NamespaceStore,
};
use coralkm_protocol::verify::FixedCodePrompt;
use coralkm_protocol::{InMemoryMediator, Mediator, ProtocolEngine};
use coralkm_wallet::{WalletAgent, WalletConfig};
use std::sync::Arc;

/// One guardian party: identity, store and engine.
pub struct GuardianFixture {
    /// The guardian's DID
    pub did: Did,
    /// Its share/policy/recovery store
    pub store: Arc<MemoryGuardianStore>,
    /// Its protocol engine
    pub engine: Arc<ProtocolEngine>,
}

/// A wired CoralKM network.
pub struct TestNetwork {
    /// Shared deterministic effects (clock + randomness)
    pub effects: Effects,
    /// The transport connecting every party
    pub mediator: Arc<InMemoryMediator>,
    /// The gateway's DID
    pub gateway_did: Did,
    /// The gateway's namespace store
    pub gateway_store: Arc<MemoryNamespaceStore>,
    /// Guardian parties, in registration order
    pub guardians: Vec<GuardianFixture>,
    /// The primary wallet, holding a fresh DEK
    pub wallet: Arc<WalletAgent>,
}

/// DID of the primary wallet in every fixture.
pub const WALLET_DID: &str = "did:coral:wallet";

/// DID of the gateway in every fixture.
pub const GATEWAY_DID: &str = "did:coral:gateway";

impl TestNetwork {
    /// Build a network with `guardian_count` guardians, seeded
    /// deterministically.
    pub async fn new(guardian_count: usize) -> Self {
        Self::with_seed(guardian_count, 0).await
    }

    /// Build a network with a specific seed (distinct transcripts per test).
    pub async fn with_seed(guardian_count: usize, seed: u64) -> Self {
        let effects = Effects::deterministic(seed, 1735689600);
        let mediator = Arc::new(InMemoryMediator::new());

        let gateway_did = Did::new(GATEWAY_DID);
        let gateway_store = Arc::new(MemoryNamespaceStore::new(
            gateway_did.clone(),
            effects.clone(),
        ));
        let gateway_engine = Arc::new(
            ProtocolEngine::new(gateway_did.clone(), effects.clone())
                .with_gateway(gateway_store.clone() as Arc<dyn NamespaceStore>),
        );
        mediator
            .register(gateway_did.clone(), gateway_engine)
            .await;

        let mut guardians = Vec::with_capacity(guardian_count);
        for index in 0..guardian_count {
            let did = Did::new(format!("did:coral:guardian-{index}"));
            let store = Arc::new(MemoryGuardianStore::new());
            let engine = Arc::new(
                ProtocolEngine::new(did.clone(), effects.clone())
                    .with_guardian(store.clone() as Arc<dyn GuardianStore>),
            );
            mediator.register(did.clone(), engine.clone()).await;
            guardians.push(GuardianFixture { did, store, engine });
        }

        let wallet_did = Did::new(WALLET_DID);
        let dek = Dek::generate(&effects);
        let wallet = attach_wallet(&mediator, wallet_did, Some(dek), &effects, None).await;

        TestNetwork {
            effects,
            mediator,
            gateway_did,
            gateway_store,
            guardians,
            wallet,
        }
    }

    /// Attach an extra wallet (e.g. a recovering device with no DEK).
    pub async fn add_wallet(&self, did: &str, dek: Option<Dek>) -> Arc<WalletAgent> {
        attach_wallet(&self.mediator, Did::new(did), dek, &self.effects, None).await
    }

    /// Attach an extra wallet with custom tunables.
    pub async fn add_wallet_with_config(
        &self,
        did: &str,
        dek: Option<Dek>,
        config: WalletConfig,
    ) -> Arc<WalletAgent> {
        attach_wallet(&self.mediator, Did::new(did), dek, &self.effects, Some(config)).await
    }

    /// Pump the network until quiescent.
    pub async fn settle(&self) -> usize {
        self.mediator
            .run_until_idle()
            .await
            .expect("network failed to settle")
    }
}

async fn attach_wallet(
    mediator: &Arc<InMemoryMediator>,
    did: Did,
    dek: Option<Dek>,
    effects: &Effects,
    config: Option<WalletConfig>,
) -> Arc<WalletAgent> {
    let mut agent = WalletAgent::new(
        did.clone(),
        dek,
        mediator.clone() as Arc<dyn Mediator>,
        Arc::new(FixedCodePrompt::default()),
        effects.clone(),
    );
    if let Some(config) = config {
        agent = agent.with_config(config);
    }
    let agent = Arc::new(agent);
    let engine = Arc::new(
        ProtocolEngine::new(did.clone(), effects.clone()).with_wallet(agent.clone()),
    );
    mediator.register(did, engine).await;
    agent
}
