//! Chain collaborator boundary
//!
//! The ledger RPC surface the pipeline needs, expressed as an async trait.
//! Implementations classify failures into [`ChainError`] variants so callers
//! never inspect error text.

use crate::types::{
    Address, AssetHandle, KeyMaterial, NetworkInfo, Receipt, SignedTx, TxCall, TxHash, TxRequest,
};
use async_trait::async_trait;

/// Ledger RPC operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainApi: Send + Sync {
    /// Address controlled by `key`
    fn address_of(&self, key: &KeyMaterial) -> Result<Address, ChainError>;

    /// Network and asset contract the handles refer to
    fn network(&self) -> NetworkInfo;

    /// Current token allowance granted by `owner` to the asset contract
    async fn allowance(&self, owner: &Address) -> Result<u128, ChainError>;

    /// Pending transaction count for `owner`
    async fn pending_nonce(&self, owner: &Address) -> Result<u64, ChainError>;

    /// Current gas price
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Gas limit estimate for `call` sent from `from`
    async fn estimate_gas(&self, from: &Address, call: &TxCall) -> Result<u64, ChainError>;

    /// Sign `request` with `key`
    async fn sign(&self, request: &TxRequest, key: &KeyMaterial) -> Result<SignedTx, ChainError>;

    /// Broadcast a signed transaction, returning its hash once accepted
    async fn send_raw(&self, signed: &SignedTx) -> Result<TxHash, ChainError>;

    /// Wait until `hash` is mined
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, ChainError>;

    /// Check that `handle` refers to an existing asset
    async fn validate_handle(&self, handle: &AssetHandle) -> Result<bool, ChainError>;
}

/// Classified chain failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The nonce was already used
    #[error("nonce too low")]
    NonceTooLow,

    /// Gas price too low, or a replacement was underpriced
    #[error("transaction underpriced")]
    Underpriced,

    /// Execution reverted
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// Transport or node-side RPC failure
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Signing failed or the key is unusable
    #[error("signing error: {0}")]
    Signing(String),
}

impl ChainError {
    /// Whether the submitter recovers from this by resubmitting
    #[inline]
    #[must_use]
    pub fn is_resubmittable(&self) -> bool {
        matches!(self, Self::NonceTooLow | Self::Underpriced)
    }
}
