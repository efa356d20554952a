//! Graph queries
//!
//! Starts a SPARQL query on the node and polls the `query` operation until
//! its result is available.

use crate::api::NodeApi;
use crate::error::QueryError;
use crate::poller::OperationPoller;
use crate::types::{OperationKind, QueryType};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Repository queried when none is given
pub const DEFAULT_REPOSITORY: &str = "privateCurrent";

/// Runs queries against the node
pub struct QueryClient {
    node: Arc<dyn NodeApi>,
    poller: Arc<OperationPoller>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    #[must_use]
    pub fn new(node: Arc<dyn NodeApi>, poller: Arc<OperationPoller>) -> Self {
        Self { node, poller }
    }

    /// Run `query` against `repository` and return the result payload
    ///
    /// # Errors
    /// - [`QueryError::Unsupported`] when the query form is not recognized
    /// - [`QueryError::Node`] when the query cannot be started
    /// - [`QueryError::Poll`] when the operation fails or does not finish
    pub async fn query(&self, query: &str, repository: &str) -> Result<Value, QueryError> {
        let query_type = QueryType::detect(query).ok_or(QueryError::Unsupported)?;
        let id = self.node.query(query, query_type, repository).await?;
        info!(operation_id = %id, ?query_type, repository, "query started");

        let record = self.poller.poll(&id, &OperationKind::Query).await?;
        Ok(record.data)
    }
}
