//! Shamir sharing property tests
//!
//! For any `1 <= t <= n` split of a 32-byte secret, every `t`-subset of the
//! shares reconstructs it and every smaller subset fails.

use coralkm_core::{CoralError, Effects};
use coralkm_crypto::sss;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn threshold_subsets_reconstruct(
        secret in prop::array::uniform32(any::<u8>()),
        n in 1u8..=12,
        seed in any::<u64>(),
    ) {
        let t = 1 + seed as u8 % n;
        let effects = Effects::deterministic(seed, 0);
        let shares = sss::split(&secret, n, t, &effects).unwrap();
        prop_assert_eq!(shares.len(), n as usize);

        // A sliding t-window over the share list
        for start in 0..=(n - t) as usize {
            let subset = &shares[start..start + t as usize];
            prop_assert_eq!(sss::combine(subset).unwrap(), secret.to_vec());
        }
    }

    #[test]
    fn below_threshold_always_fails(
        secret in prop::array::uniform32(any::<u8>()),
        n in 2u8..=12,
        seed in any::<u64>(),
    ) {
        let t = 2 + seed as u8 % (n.max(2) - 1).max(1);
        prop_assume!(t <= n);
        let effects = Effects::deterministic(seed, 0);
        let shares = sss::split(&secret, n, t, &effects).unwrap();

        let short = &shares[0..(t - 1) as usize];
        prop_assert!(
            matches!(
                sss::combine(short),
                Err(CoralError::SssInsufficientShares { .. })
            ),
            "expected SssInsufficientShares error for below-threshold combine"
        );
    }

    #[test]
    fn combine_is_idempotent(
        secret in prop::array::uniform32(any::<u8>()),
        seed in any::<u64>(),
    ) {
        let effects = Effects::deterministic(seed, 0);
        let shares = sss::split(&secret, 5, 3, &effects).unwrap();
        let first = sss::combine(&shares[0..3]).unwrap();
        let second = sss::combine(&shares[0..3]).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn wire_roundtrip_preserves_shares(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        seed in any::<u64>(),
    ) {
        let effects = Effects::deterministic(seed, 0);
        let shares = sss::split(&secret, 4, 2, &effects).unwrap();
        let decoded: Vec<_> = shares
            .iter()
            .map(|s| sss::SecretShare::from_bytes(&s.to_bytes()).unwrap())
            .collect();
        prop_assert_eq!(sss::combine(&decoded[1..3]).unwrap(), secret);
    }
}

#[test]
fn a_single_missing_share_below_threshold_leaks_nothing_structurally() {
    // With t-1 shares the interpolation is underdetermined; combine refuses
    // rather than returning a guess.
    let effects = Effects::deterministic(5, 0);
    let shares = sss::split(&[0xAAu8; 32], 3, 3, &effects).unwrap();
    assert_eq!(
        sss::combine(&shares[0..2]),
        Err(CoralError::SssInsufficientShares { needed: 3, got: 2 })
    );
}
