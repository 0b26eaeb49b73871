//! Common types for the protocol client.
//!
//! This crate holds the data model shared by every layer of the client:
//! transactions and receipts as the node reports them, account-scoped log
//! filters, protocol snapshots (rounds, jobs, claims, timing parameters) and
//! the configuration validation framework used by pluggable implementations.

/// Transactions, receipts and logs as exchanged with the node.
pub mod chain;
/// Log filters and one-shot subscriptions.
pub mod filter;
/// Protocol-level snapshots: rounds, jobs, claims and timing parameters.
pub mod protocol;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Zeroizing string type for key material and passphrases.
pub mod secret_string;
/// Hex and display helpers.
pub mod utils;
/// Configuration validation types for pluggable implementations.
pub mod validation;

pub use alloy::primitives::{Address, Bytes, B256, U256};
pub use chain::*;
pub use filter::*;
pub use protocol::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{left_pad_address, truncate_id};
pub use validation::*;
