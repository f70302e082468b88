//! # CoralKM Wallet - wallet-side orchestration
//!
//! Everything a wallet does above the protocol layer: keeping the guardian
//! view, re-splitting the DEK when membership changes, syncing encrypted
//! backups to the namespace gateway, and running the recovery ceremony that
//! reconstructs the DEK on a new device.

#![forbid(unsafe_code)]

/// Wallet backup plaintext model
pub mod backup;
/// Structured events surfaced to the UI
pub mod events;
/// Wallet facade implementing the engine's wallet hooks
pub mod facade;
/// Wallet-side recovery ceremony state machine
pub mod recovery;
/// Threshold share distribution across guardians
pub mod share_manager;
/// Backup PUT/GET flow with integrity verification
pub mod sync;

pub use backup::{BackupKeys, ShareRecord, WalletBackup};
pub use events::WalletEvent;
pub use facade::{WalletAgent, WalletConfig};
