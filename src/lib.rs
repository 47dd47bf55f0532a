//! # dmint-core
//!
//! Resolution and claiming of "dmint" covenants on Radiant: UTXO contracts
//! that release a fixed token reward each time a proof-of-work nonce is
//! submitted against their current state.
//!
//! ## Architecture
//!
//! The crate is layered leaves first:
//! - Script codec (`script`, `transaction`, `wallet`): recognizes the contract's
//!   state, burn and message scripts and builds signed transactions
//! - Contract resolver (`resolver`, `glyph`, `cache`): walks a contract
//!   reference's history to its current location and parameters
//! - Claim engine (`claim`): builds and broadcasts the transaction that
//!   advances a contract one step, or burns it on the last mint
//! - Submission coordinator (`coordinator`, `session`, `events`): serializes
//!   found nonces against a single in-flight claim and follows the contract
//!   as it moves on chain
//!
//! Chain access goes through the [`chain::ChainClient`] trait; the crate
//! ships no transport.
//!
//! ## Usage
//!
//! ```rust
//! use dmint_core::script::{decode_burn, encode_burn};
//! use dmint_core::types::{ContractRef, Txid};
//!
//! let contract_ref = ContractRef::new(Txid([0x11; 32]), 0);
//! let script = encode_burn(&contract_ref);
//! assert_eq!(decode_burn(&script), Some(contract_ref));
//! ```

pub mod cache;
pub mod chain;
pub mod claim;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod glyph;
pub mod pow;
pub mod resolver;
pub mod script;
pub mod session;
pub mod transaction;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use cache::{Cache, MemoryCache};
pub use chain::ChainClient;
pub use claim::{ClaimRejection, FailureReason};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{DmintError, Result};
pub use events::Event;
pub use resolver::{Deployment, DeploymentSource, Resolver};
pub use session::Session;
pub use types::*;
pub use wallet::{Address, Wallet};
