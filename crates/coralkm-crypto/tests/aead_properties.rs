//! AEAD property tests
//!
//! The backup encryption contract: round-trips hold for every key, plaintext
//! and context object; any associated-data mismatch, including presence
//! mismatch, fails closed with an AAD error.

use coralkm_core::{CoralError, Did, Effects, Namespace};
use coralkm_crypto::{aead, Dek};
use proptest::prelude::*;
use uuid::Uuid;

fn namespace(tag: u128) -> Namespace {
    Namespace::new(Uuid::from_u128(tag), Did::new("did:coral:gateway"))
}

proptest! {
    #[test]
    fn roundtrip_holds_for_any_plaintext(
        key in prop::array::uniform32(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        tag in any::<u128>(),
    ) {
        let effects = Effects::test();
        let dek = Dek::from_bytes(key);
        let ns = namespace(tag);

        let envelope = aead::encrypt(&dek, &plaintext, Some(&ns), &effects).unwrap();
        prop_assert_eq!(aead::decrypt(&dek, &envelope, Some(&ns)).unwrap(), plaintext);
    }

    #[test]
    fn different_context_object_fails(
        key in prop::array::uniform32(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 0..128),
        tag_a in any::<u128>(),
        tag_b in any::<u128>(),
    ) {
        prop_assume!(tag_a != tag_b);
        let effects = Effects::test();
        let dek = Dek::from_bytes(key);

        let envelope = aead::encrypt(&dek, &plaintext, Some(&namespace(tag_a)), &effects).unwrap();
        prop_assert_eq!(
            aead::decrypt(&dek, &envelope, Some(&namespace(tag_b))),
            Err(CoralError::AeadAadMismatch)
        );
    }

    #[test]
    fn wrong_key_never_decrypts(
        key_a in prop::array::uniform32(any::<u8>()),
        key_b in prop::array::uniform32(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        prop_assume!(key_a != key_b);
        let effects = Effects::test();

        let envelope =
            aead::encrypt::<Namespace>(&Dek::from_bytes(key_a), &plaintext, None, &effects).unwrap();
        prop_assert!(aead::decrypt::<Namespace>(&Dek::from_bytes(key_b), &envelope, None).is_err());
    }
}

#[test]
fn fresh_iv_per_call() {
    let effects = Effects::test();
    let dek = Dek::from_bytes([0u8; 32]);
    let a = aead::encrypt::<Namespace>(&dek, b"same", None, &effects).unwrap();
    let b = aead::encrypt::<Namespace>(&dek, b"same", None, &effects).unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ct, b.ct);
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let effects = Effects::test();
    let dek = Dek::from_bytes([1u8; 32]);
    let ns = namespace(7);
    let mut envelope = aead::encrypt(&dek, b"backup", Some(&ns), &effects).unwrap();
    let mut ct = coralkm_core::encoding::b64url_decode(&envelope.ct).unwrap();
    ct[0] ^= 0x01;
    envelope.ct = coralkm_core::encoding::b64url_encode(&ct);
    assert!(aead::decrypt(&dek, &envelope, Some(&ns)).is_err());
}
