//! Node collaborator boundary

use crate::error::NodeError;
use crate::types::{
    NodeGetRequest, NodeInfo, NodePublishRequest, OperationId, OperationKind, OperationRecord,
    QueryType,
};
use async_trait::async_trait;
use dkg_assertion::ContentHash;

/// Node JSON API operations
///
/// Status reads (`operation_result`) must be side-effect free so polling can
/// repeat them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Node version and metadata
    async fn info(&self) -> Result<NodeInfo, NodeError>;

    /// Suggested stake, as a decimal string of base token units
    async fn bid_suggestion(
        &self,
        content_id: ContentHash,
        byte_size: u64,
        replication_factor: u32,
    ) -> Result<Option<String>, NodeError>;

    /// Start a query
    async fn query(
        &self,
        query: &str,
        query_type: QueryType,
        repository: &str,
    ) -> Result<OperationId, NodeError>;

    /// Hand a created asset's statements to the node
    async fn publish(&self, request: &NodePublishRequest) -> Result<OperationId, NodeError>;

    /// Start resolving a created asset's content
    async fn get(&self, request: &NodeGetRequest) -> Result<OperationId, NodeError>;

    /// Current status and result of an operation
    async fn operation_result(
        &self,
        id: &OperationId,
        kind: &OperationKind,
    ) -> Result<OperationRecord, NodeError>;
}

/// A network session that can be torn down and rebuilt
pub trait SessionControl: Send + Sync {
    /// Replace the underlying connections
    ///
    /// # Errors
    /// Returns [`NodeError::Client`] when a new session cannot be built
    fn recycle(&self) -> Result<(), NodeError>;
}
