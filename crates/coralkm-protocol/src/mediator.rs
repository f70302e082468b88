//! Mediator transport seam and in-memory implementation
//!
//! The protocol assumes a sender-authenticated, recipient-encrypted
//! transport with correlated delivery; [`Mediator`] is the narrow interface
//! the core uses to hand a wire message to it. [`InMemoryMediator`] wires a
//! set of engines together for tests and demos: deliveries are queued and
//! pumped deterministically, one message at a time.

use crate::engine::ProtocolEngine;
use async_trait::async_trait;
use coralkm_core::{CoralError, Did, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Address that delivers to every registered party except the sender.
pub const BROADCAST_DID: &str = "did:coral:broadcast";

/// The transport seam: fire-and-forget wire delivery.
#[async_trait]
pub trait Mediator: Send + Sync {
    /// Queue a wire message for delivery.
    async fn send(&self, wire: Value) -> Result<()>;
}

struct MediatorState {
    parties: HashMap<Did, Arc<ProtocolEngine>>,
    queue: VecDeque<Value>,
}

/// Deterministic in-memory transport connecting engines by DID.
pub struct InMemoryMediator {
    state: async_lock::Mutex<MediatorState>,
}

impl InMemoryMediator {
    /// Empty network.
    pub fn new() -> Self {
        InMemoryMediator {
            state: async_lock::Mutex::new(MediatorState {
                parties: HashMap::new(),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Attach a party to the network.
    pub async fn register(&self, did: Did, engine: Arc<ProtocolEngine>) {
        self.state.lock().await.parties.insert(did, engine);
    }

    /// Deliver one queued message to its recipients, queueing any replies.
    ///
    /// Returns `false` when the queue was empty.
    pub async fn step(&self) -> Result<bool> {
        let (wire, recipients) = {
            let mut state = self.state.lock().await;
            let Some(wire) = state.queue.pop_front() else {
                return Ok(false);
            };
            let recipients = resolve_recipients(&state.parties, &wire);
            (wire, recipients)
        };

        let mut replies = Vec::new();
        for engine in recipients {
            replies.extend(engine.handle_wire(&wire).await?);
        }

        let mut state = self.state.lock().await;
        state.queue.extend(replies);
        Ok(true)
    }

    /// Pump the network until no messages remain. Returns how many messages
    /// were delivered.
    pub async fn run_until_idle(&self) -> Result<usize> {
        // Generous bound so a reply loop fails loudly instead of hanging
        const MAX_DELIVERIES: usize = 10_000;
        let mut delivered = 0;
        while self.step().await? {
            delivered += 1;
            if delivered > MAX_DELIVERIES {
                return Err(CoralError::internal(
                    "mediator did not quiesce; reply loop suspected",
                ));
            }
        }
        Ok(delivered)
    }

    /// Number of messages currently queued.
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

impl Default for InMemoryMediator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mediator for InMemoryMediator {
    async fn send(&self, wire: Value) -> Result<()> {
        debug!(
            type_uri = wire.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "message queued"
        );
        self.state.lock().await.queue.push_back(wire);
        Ok(())
    }
}

fn resolve_recipients(
    parties: &HashMap<Did, Arc<ProtocolEngine>>,
    wire: &Value,
) -> Vec<Arc<ProtocolEngine>> {
    let sender = wire.get("from").and_then(Value::as_str).unwrap_or_default();
    let Some(to) = wire.get("to").and_then(Value::as_array) else {
        warn!("message without recipients dropped");
        return Vec::new();
    };

    let mut engines = Vec::new();
    for entry in to {
        let Some(address) = entry.as_str() else {
            continue;
        };
        if address == BROADCAST_DID {
            // Deterministic fan-out order
            let mut everyone: Vec<_> = parties
                .iter()
                .filter(|(did, _)| did.as_str() != sender)
                .collect();
            everyone.sort_by(|(a, _), (b, _)| a.cmp(b));
            engines.extend(everyone.into_iter().map(|(_, engine)| engine.clone()));
        } else if let Some(engine) = parties.get(&Did::new(address)) {
            engines.push(engine.clone());
        } else {
            debug!(address, "no registered party at address; dropped");
        }
    }
    engines
}
