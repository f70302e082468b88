//! Threshold share distribution across guardians
//!
//! Any change to the granted-guardian set triggers a re-split: the DEK is
//! split `n`-of-`t` with `t = max(2, ceil(n/2))` and one `guardian-share-
//! update` goes to each guardian. Cycles are serialized: a membership change
//! during an in-flight cycle defers until every outstanding confirmation has
//! arrived. Partial failures do not roll back the guardians that confirmed.

use crate::backup::ShareRecord;
use coralkm_core::{encoding, Did, Effects, Namespace, Result};
use coralkm_crypto::{sss, Dek};
use coralkm_protocol::messages::{Body, Envelope, GuardianShareUpdateBody};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Threshold rule: majority of the guardian set, but never below two.
pub fn threshold_for(guardian_count: usize) -> u8 {
    ((guardian_count + 1) / 2).max(2) as u8
}

/// Result of asking for a re-split.
#[derive(Debug)]
pub enum ResplitOutcome {
    /// Updates are on their way to every guardian
    Started {
        /// One share-update message per guardian
        envelopes: Vec<Envelope>,
    },
    /// A single guardian would hold the full secret; nothing was sent
    TooFewGuardians {
        /// Granted guardian count
        count: usize,
    },
    /// A cycle is already in flight; this one runs after it completes
    Deferred,
}

/// A re-split cycle completed or progressed.
#[derive(Debug, PartialEq)]
pub enum ConfirmProgress {
    /// The thread does not belong to the active cycle
    Unknown,
    /// Still waiting on confirmations
    Pending {
        /// Guardians yet to confirm
        remaining: usize,
    },
    /// Every guardian confirmed
    Complete {
        /// The distribution that is now live
        records: Vec<ShareRecord>,
        /// Threshold of the new split
        threshold: u8,
    },
}

struct Cycle {
    pending: HashMap<Uuid, Did>,
    records: Vec<ShareRecord>,
    threshold: u8,
}

/// Serializes re-split cycles and tracks confirmations.
pub struct ShareManager {
    cycle: Option<Cycle>,
    deferred: bool,
}

impl ShareManager {
    /// Manager with no cycle in flight.
    pub fn new() -> Self {
        ShareManager {
            cycle: None,
            deferred: false,
        }
    }

    /// Whether a cycle is awaiting confirmations.
    pub fn in_flight(&self) -> bool {
        self.cycle.is_some()
    }

    /// Begin a re-split over the granted guardians.
    ///
    /// Share assignment is stable with respect to the order of `guardians`;
    /// callers pass the set in sorted order so repeated splits line up.
    pub fn begin(
        &mut self,
        dek: &Dek,
        namespace: &Namespace,
        guardians: &[Did],
        effects: &Effects,
        wallet: &Did,
    ) -> Result<ResplitOutcome> {
        if self.cycle.is_some() {
            debug!(wallet = %wallet, "re-split already in flight; deferring");
            self.deferred = true;
            return Ok(ResplitOutcome::Deferred);
        }

        let n = guardians.len();
        if n < 2 {
            warn!(wallet = %wallet, count = n, "too few guardians for a split");
            return Ok(ResplitOutcome::TooFewGuardians { count: n });
        }

        let threshold = threshold_for(n);
        let shares = sss::split(dek.as_bytes(), n as u8, threshold, effects)?;
        let now = effects.now()?;

        let mut envelopes = Vec::with_capacity(n);
        let mut pending = HashMap::with_capacity(n);
        let mut records = Vec::with_capacity(n);
        for (guardian, share) in guardians.iter().zip(shares) {
            let encoded = encoding::b64url_encode(&share.to_bytes());
            let envelope = Envelope::new(
                effects.gen_uuid(),
                wallet.clone(),
                guardian.clone(),
                Body::GuardianShareUpdate(GuardianShareUpdateBody {
                    namespace: namespace.clone(),
                    threshold,
                    share: encoded.clone(),
                    delay: None,
                }),
            );
            pending.insert(envelope.id, guardian.clone());
            records.push(ShareRecord {
                guardian: guardian.clone(),
                namespace: namespace.clone(),
                threshold,
                share: encoded,
                updated_at: now,
            });
            envelopes.push(envelope);
        }

        info!(wallet = %wallet, n, threshold, "re-split started");
        self.cycle = Some(Cycle {
            pending,
            records,
            threshold,
        });
        Ok(ResplitOutcome::Started { envelopes })
    }

    /// Record a `guardian-share-update-confirm` for the given thread.
    pub fn on_confirm(&mut self, thread_id: Uuid) -> ConfirmProgress {
        let Some(cycle) = self.cycle.as_mut() else {
            return ConfirmProgress::Unknown;
        };
        if cycle.pending.remove(&thread_id).is_none() {
            return ConfirmProgress::Unknown;
        }
        if !cycle.pending.is_empty() {
            return ConfirmProgress::Pending {
                remaining: cycle.pending.len(),
            };
        }
        // Cycle is done; take it so a deferred one can start
        match self.cycle.take() {
            Some(done) => ConfirmProgress::Complete {
                records: done.records,
                threshold: done.threshold,
            },
            None => ConfirmProgress::Unknown,
        }
    }

    /// Drop a guardian from the in-flight cycle without rolling back others.
    ///
    /// Used when a thread times out; the cycle completes over the guardians
    /// that did confirm.
    pub fn abandon_thread(&mut self, thread_id: Uuid) -> Option<Did> {
        let cycle = self.cycle.as_mut()?;
        let guardian = cycle.pending.remove(&thread_id)?;
        warn!(guardian = %guardian, "share update unconfirmed; continuing without rollback");
        cycle.records.retain(|record| record.guardian != guardian);
        if cycle.pending.is_empty() {
            self.cycle = None;
        }
        Some(guardian)
    }

    /// Consume the deferred flag; `true` means a new cycle should begin now.
    pub fn take_deferred(&mut self) -> bool {
        std::mem::take(&mut self.deferred)
    }
}

impl Default for ShareManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardians(count: usize) -> Vec<Did> {
        (0..count)
            .map(|i| Did::new(format!("did:coral:guardian-{i}")))
            .collect()
    }

    fn setup() -> (ShareManager, Dek, Namespace, Effects, Did) {
        let effects = Effects::test();
        (
            ShareManager::new(),
            Dek::generate(&effects),
            Namespace::new(Uuid::from_u128(1), Did::new("did:coral:gw")),
            effects,
            Did::new("did:coral:wallet"),
        )
    }

    #[test]
    fn threshold_is_majority_with_floor_two() {
        assert_eq!(threshold_for(2), 2);
        assert_eq!(threshold_for(3), 2);
        assert_eq!(threshold_for(4), 2);
        assert_eq!(threshold_for(5), 3);
        assert_eq!(threshold_for(7), 4);
    }

    #[test]
    fn single_guardian_is_refused() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        let outcome = manager
            .begin(&dek, &ns, &guardians(1), &effects, &wallet)
            .unwrap();
        assert!(matches!(outcome, ResplitOutcome::TooFewGuardians { count: 1 }));
        assert!(!manager.in_flight());
    }

    #[test]
    fn each_guardian_gets_exactly_one_share() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        let set = guardians(3);
        let ResplitOutcome::Started { envelopes } = manager
            .begin(&dek, &ns, &set, &effects, &wallet)
            .unwrap()
        else {
            panic!("expected a started cycle");
        };
        assert_eq!(envelopes.len(), 3);
        let recipients: Vec<_> = envelopes.iter().flat_map(|e| e.to.clone()).collect();
        assert_eq!(recipients, set);

        // All shares distinct, threshold = 2 everywhere
        let mut seen = std::collections::HashSet::new();
        for envelope in &envelopes {
            let Body::GuardianShareUpdate(body) = &envelope.body else {
                panic!("expected share update");
            };
            assert_eq!(body.threshold, 2);
            assert!(seen.insert(body.share.clone()), "duplicate share issued");
        }
    }

    #[test]
    fn cycle_completes_when_all_confirm() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        let ResplitOutcome::Started { envelopes } = manager
            .begin(&dek, &ns, &guardians(2), &effects, &wallet)
            .unwrap()
        else {
            panic!("expected a started cycle");
        };

        assert_eq!(
            manager.on_confirm(envelopes[0].id),
            ConfirmProgress::Pending { remaining: 1 }
        );
        match manager.on_confirm(envelopes[1].id) {
            ConfirmProgress::Complete { records, threshold } => {
                assert_eq!(threshold, 2);
                assert_eq!(records.len(), 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(!manager.in_flight());
    }

    #[test]
    fn membership_change_during_cycle_is_deferred() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        manager
            .begin(&dek, &ns, &guardians(2), &effects, &wallet)
            .unwrap();
        let outcome = manager
            .begin(&dek, &ns, &guardians(3), &effects, &wallet)
            .unwrap();
        assert!(matches!(outcome, ResplitOutcome::Deferred));
        assert!(manager.take_deferred());
        assert!(!manager.take_deferred(), "flag is consumed");
    }

    #[test]
    fn unknown_thread_is_ignored() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        manager
            .begin(&dek, &ns, &guardians(2), &effects, &wallet)
            .unwrap();
        assert_eq!(
            manager.on_confirm(Uuid::from_u128(999)),
            ConfirmProgress::Unknown
        );
    }

    #[test]
    fn abandoned_thread_shrinks_the_record_set() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        let ResplitOutcome::Started { envelopes } = manager
            .begin(&dek, &ns, &guardians(2), &effects, &wallet)
            .unwrap()
        else {
            panic!("expected a started cycle");
        };
        manager.abandon_thread(envelopes[0].id).unwrap();
        match manager.on_confirm(envelopes[1].id) {
            ConfirmProgress::Complete { records, .. } => assert_eq!(records.len(), 1),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn shares_recombine_to_the_dek() {
        let (mut manager, dek, ns, effects, wallet) = setup();
        let ResplitOutcome::Started { envelopes } = manager
            .begin(&dek, &ns, &guardians(3), &effects, &wallet)
            .unwrap()
        else {
            panic!("expected a started cycle");
        };
        let shares: Vec<_> = envelopes
            .iter()
            .map(|e| {
                let Body::GuardianShareUpdate(body) = &e.body else {
                    panic!("expected share update");
                };
                sss::SecretShare::from_bytes(&encoding::b64url_decode(&body.share).unwrap())
                    .unwrap()
            })
            .collect();
        // Any two of three suffice
        assert_eq!(
            sss::combine(&shares[1..3]).unwrap().as_slice(),
            dek.as_bytes().as_slice()
        );
    }
}
