//! DKG Chain
//!
//! Chain-facing half of the publish pipeline.
//!
//! # Core Concepts
//!
//! - [`ChainApi`]: the ledger RPC collaborator, with typed [`ChainError`]s
//! - [`SigningIdentity`]: key material plus per-identity nonce and allowance state
//! - [`TransactionSubmitter`]: serialized build-sign-submit-confirm with bounded recovery
//! - [`AllowanceManager`]: cache-first allowance checks and approvals
//! - [`AssetHandle`]: opaque locator of a created asset

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod allowance;
mod api;
mod identity;
mod submitter;
mod types;

pub use allowance::{
    AllowanceCheck, AllowanceConfig, AllowanceError, AllowanceManager, AllowanceReservation,
    DEFAULT_MINIMUM_ALLOWANCE,
};
pub use api::{ChainApi, ChainError};
pub use identity::{AllowanceCache, AllowanceState, SigningIdentity};
pub use submitter::{Confirmed, SubmitError, SubmitPolicy, TransactionSubmitter};
pub use types::{
    amount, Address, AssetHandle, KeyMaterial, NetworkInfo, ParseError, Receipt, SignedTx,
    Transaction, TxCall, TxHash, TxRequest, TxStatus,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
