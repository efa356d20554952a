//! Operation polling
//!
//! Confirms asynchronous node-side operations by repeatedly fetching their
//! status under a [`RetryPolicy`]:
//! - COMPLETED returns the record
//! - FAILED errors at once, never retried
//! - PENDING / IN_PROGRESS wait and fetch again, up to `max_retries` times
//! - a failed fetch propagates immediately (transport retry belongs to the session)

use crate::api::NodeApi;
use crate::error::PollError;
use crate::retry::RetryPolicy;
use crate::types::{OperationId, OperationKind, OperationRecord, OperationStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Polling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            backoff: 2.0,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            self.backoff,
        )
    }
}

/// Polls node operations to a terminal status
pub struct OperationPoller {
    node: Arc<dyn NodeApi>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for OperationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationPoller")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OperationPoller {
    #[must_use]
    pub fn new(node: Arc<dyn NodeApi>, policy: RetryPolicy) -> Self {
        Self { node, policy }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Poll `id` until it completes
    ///
    /// # Errors
    /// - [`PollError::OperationFailed`] as soon as the node reports FAILED
    /// - [`PollError::OperationNotFinished`] once retries are exhausted
    /// - [`PollError::Node`] when a status fetch fails
    pub async fn poll(
        &self,
        id: &OperationId,
        kind: &OperationKind,
    ) -> Result<OperationRecord, PollError> {
        let span = info_span!("poll", operation_id = %id, kind = %kind);
        self.policy
            .run(
                |err| matches!(err, PollError::OperationNotFinished { .. }),
                |attempt| self.check(id, kind, attempt),
            )
            .instrument(span)
            .await
    }

    /// [`poll`](Self::poll) bounded by an overall deadline
    ///
    /// # Errors
    /// [`PollError::DeadlineExceeded`] when `deadline` elapses first, otherwise
    /// as [`poll`](Self::poll)
    pub async fn poll_with_deadline(
        &self,
        id: &OperationId,
        kind: &OperationKind,
        deadline: Duration,
    ) -> Result<OperationRecord, PollError> {
        tokio::time::timeout(deadline, self.poll(id, kind))
            .await
            .map_err(|_| {
                warn!(operation_id = %id, kind = %kind, ?deadline, "poll deadline exceeded");
                PollError::DeadlineExceeded {
                    id: id.clone(),
                    kind: kind.clone(),
                }
            })?
    }

    async fn check(
        &self,
        id: &OperationId,
        kind: &OperationKind,
        attempt: u32,
    ) -> Result<OperationRecord, PollError> {
        let record = self.node.operation_result(id, kind).await?;
        debug!(attempt, status = ?record.status, "operation status");

        match record.status {
            OperationStatus::Completed => Ok(record),
            OperationStatus::Failed => {
                warn!(attempt, reason = ?record.error_message, "operation failed");
                Err(PollError::OperationFailed {
                    id: id.clone(),
                    kind: kind.clone(),
                    reason: record
                        .error_message
                        .unwrap_or_else(|| "no reason given".to_string()),
                })
            }
            OperationStatus::Pending | OperationStatus::InProgress => {
                Err(PollError::OperationNotFinished {
                    id: id.clone(),
                    kind: kind.clone(),
                    attempts: attempt + 1,
                })
            }
        }
    }
}
