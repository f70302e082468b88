//! # CoralKM Core - foundation types
//!
//! Single source of truth for the domain concepts shared by every CoralKM
//! crate: identities, namespaces, the unified error type, injectable effects
//! (time and randomness), and encoding helpers.
//!
//! This crate has zero dependencies on other CoralKM crates.

#![forbid(unsafe_code)]

/// Encoding helpers (base64url, canonical JSON)
pub mod encoding;
/// Injectable time and randomness for deterministic testing
pub mod effects;
/// Unified error handling
pub mod error;
/// Identity and namespace types
pub mod identity;

pub use effects::*;
pub use error::*;
pub use identity::*;
