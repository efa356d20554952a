//! Request, job and outcome types

use crate::error::PublishError;
use dkg_assertion::{Assertion, ContentHash, GraphPayload};
use dkg_chain::{AllowanceCheck, AssetHandle, SigningIdentity, TxHash};
use dkg_node::{Bid, OperationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

pub use dkg_node::Visibility;

/// One formatted assertion to publish under one identity
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub assertion: Assertion,
    pub replication_factor: u32,
    pub visibility: Visibility,
    pub identity: Arc<SigningIdentity>,
}

impl PublishRequest {
    /// Public request with replication factor 1
    #[must_use]
    pub fn new(assertion: Assertion, identity: Arc<SigningIdentity>) -> Self {
        Self {
            assertion,
            replication_factor: 1,
            visibility: Visibility::Public,
            identity,
        }
    }

    #[must_use]
    pub fn with_replication_factor(mut self, factor: u32) -> Self {
        self.replication_factor = factor;
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Unformatted work item for the pool
#[derive(Debug, Clone, PartialEq)]
pub struct PublishJob {
    pub payload: GraphPayload,
    /// `None` uses the configured default
    pub replication_factor: Option<u32>,
    pub visibility: Visibility,
}

impl PublishJob {
    #[must_use]
    pub fn new(payload: GraphPayload) -> Self {
        Self {
            payload,
            replication_factor: None,
            visibility: Visibility::Public,
        }
    }

    #[must_use]
    pub fn with_replication_factor(mut self, factor: u32) -> Self {
        self.replication_factor = Some(factor);
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Identifier for one pool job, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub handle: AssetHandle,
    pub content_id: ContentHash,
    pub byte_size: u64,
    pub stake: u128,
    /// `None` when the fallback stake was used
    pub bid: Option<Bid>,
    /// How the final allowance requirement was met
    pub allowance: AllowanceCheck,
    pub create_tx: TxHash,
    pub asset_index: u64,
    /// Collaborator validity check; `None` when it was skipped or errored
    pub handle_valid: Option<bool>,
    /// Node-side publish operation, when confirmed on the node
    pub node_operation: Option<OperationId>,
}

/// What a publish achieved before it failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProgress {
    /// Approval transactions sent for this publish
    pub approval_txs: Vec<TxHash>,
    pub content_id: Option<ContentHash>,
    pub bid: Option<Bid>,
    pub create_tx: Option<TxHash>,
    /// Set once the create transaction is confirmed
    pub handle: Option<AssetHandle>,
}

impl PublishProgress {
    /// An approval went through even if nothing else did
    #[inline]
    #[must_use]
    pub fn allowance_raised(&self) -> bool {
        !self.approval_txs.is_empty()
    }

    /// The asset exists on chain
    #[inline]
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn record_allowance(&mut self, check: &AllowanceCheck) {
        if let Some(tx) = check.approval_tx() {
            self.approval_txs.push(tx);
        }
    }
}

/// A failed publish with its partial progress
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct PublishFailure {
    pub error: PublishError,
    pub progress: PublishProgress,
}

impl PublishFailure {
    #[must_use]
    pub fn new(error: PublishError, progress: PublishProgress) -> Self {
        Self { error, progress }
    }
}

impl From<PublishError> for PublishFailure {
    fn from(error: PublishError) -> Self {
        Self::new(error, PublishProgress::default())
    }
}
