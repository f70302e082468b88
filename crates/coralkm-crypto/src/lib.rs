//! # CoralKM Crypto - backup encryption and threshold sharing
//!
//! The two cryptographic pillars of CoralKM: AES-256-GCM authenticated
//! encryption binding each wallet backup to its namespace, and Shamir secret
//! sharing splitting the data-encryption key across a guardian quorum.

#![forbid(unsafe_code)]

/// AES-256-GCM envelope with associated-data binding
pub mod aead;
/// Data-encryption key handling
pub mod dek;
/// Shamir secret sharing over GF(256)
pub mod sss;

pub use aead::{decrypt, encrypt, CipherEnvelope};
pub use dek::Dek;
pub use sss::{combine, split, SecretShare};
