//! # CoralKM Protocol - messages, codec, stores, engine
//!
//! The protocol layer: typed message envelopes with thread correlation, the
//! wire codec with per-type validation and problem reports, persistence
//! contracts for the gateway and guardian roles, the per-role protocol
//! engine, and the mediator seam to the secure transport.

#![forbid(unsafe_code)]

/// Wire codec: decode/encode, validation, problem reports
pub mod codec;
/// Per-role protocol engine
pub mod engine;
/// Mediator transport seam and in-memory implementation
pub mod mediator;
/// Typed protocol messages
pub mod messages;
/// Persistence contracts and in-memory stores
pub mod store;
/// Recovery verification seams (demo code check)
pub mod verify;

pub use engine::{ProtocolEngine, Role, WalletHooks};
pub use mediator::{InMemoryMediator, Mediator, BROADCAST_DID};
pub use messages::{Body, Envelope};
