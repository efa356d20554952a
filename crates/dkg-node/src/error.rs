//! Node-side error types

use crate::types::{OperationId, OperationKind};

/// Failures talking to the node
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Connection, timeout or other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("node returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// Client construction failed
    #[error("client error: {0}")]
    Client(String),
}

impl NodeError {
    /// Whether the HTTP session retries this
    ///
    /// Transport failures and 500/502/503/504 responses.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            Self::Decode(_) | Self::Client(_) => false,
        }
    }

    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Operation polling failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Still non-terminal after every allowed attempt
    #[error("{kind} operation {id} not finished after {attempts} attempts")]
    OperationNotFinished {
        id: OperationId,
        kind: OperationKind,
        attempts: u32,
    },

    /// The node reported the operation as failed
    #[error("{kind} operation {id} failed: {reason}")]
    OperationFailed {
        id: OperationId,
        kind: OperationKind,
        reason: String,
    },

    /// Caller-imposed deadline elapsed
    #[error("{kind} operation {id} exceeded its deadline")]
    DeadlineExceeded { id: OperationId, kind: OperationKind },

    /// Status fetch failed
    #[error("status fetch failed: {0}")]
    Node(#[from] NodeError),
}

/// Bid estimation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BidError {
    /// Missing, unparsable or non-positive stake suggestion
    #[error("invalid bid: {0}")]
    InvalidBid(String),

    /// Request failed
    #[error("bid request failed: {0}")]
    Node(#[from] NodeError),
}

/// Query failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Not a SELECT, CONSTRUCT, ASK or DESCRIBE query
    #[error("unsupported query")]
    Unsupported,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Poll(#[from] PollError),
}
