//! Error types for the publish pipeline
//!
//! [`PublishError`] is the caller-facing taxonomy. Component errors convert
//! into it with their recovery already exhausted:
//! - submission errors become `NonceConflict`, `UnderpricedTransaction` or
//!   `TransactionFailed`
//! - poll errors keep `OperationNotFinished` distinct from `OperationFailed`
//! - bid errors become `InvalidBid` unless the request itself failed

use crate::config::ConfigError;
use dkg_assertion::FormatError;
use dkg_chain::{AllowanceError, SubmitError};
use dkg_node::{BidError, NodeError, OperationId, OperationKind, PollError, QueryError};

/// Main pipeline error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Malformed graph input
    #[error("invalid graph: {0}")]
    InvalidGraph(#[from] FormatError),

    /// Missing or non-positive stake
    #[error("invalid bid: {0}")]
    InvalidBid(String),

    /// The allowance could not be brought up to `required`
    #[error("insufficient allowance (required {required}): {source}")]
    InsufficientAllowance {
        required: u128,
        #[source]
        source: AllowanceError,
    },

    /// Nonce refresh and resubmission exhausted
    #[error("nonce conflict after {attempts} attempts")]
    NonceConflict { attempts: u32 },

    /// Fee escalation exhausted
    #[error("transaction underpriced after {attempts} attempts")]
    UnderpricedTransaction { attempts: u32 },

    /// Any other submission failure
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// Bounded polling exhausted
    #[error("{kind} operation {id} not finished after {attempts} attempts")]
    OperationNotFinished {
        id: OperationId,
        kind: OperationKind,
        attempts: u32,
    },

    /// Remote-reported failure
    #[error("{kind} operation {id} failed: {reason}")]
    OperationFailed {
        id: OperationId,
        kind: OperationKind,
        reason: String,
    },

    /// Caller-imposed deadline elapsed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Query text is not a supported query form
    #[error("unsupported query")]
    UnsupportedQuery,

    /// Node request failed
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The publish task ended without a result
    #[error("publish task aborted: {0}")]
    Aborted(String),
}

impl PublishError {
    /// Check if a caller may retry the same publish later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InsufficientAllowance { .. }
            | Self::NonceConflict { .. }
            | Self::UnderpricedTransaction { .. }
            | Self::OperationNotFinished { .. }
            | Self::DeadlineExceeded(_) => true,
            Self::Node(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidGraph(_) => "invalid_graph",
            Self::InvalidBid(_) => "invalid_bid",
            Self::InsufficientAllowance { .. } => "insufficient_allowance",
            Self::NonceConflict { .. } => "nonce_conflict",
            Self::UnderpricedTransaction { .. } => "underpriced_transaction",
            Self::TransactionFailed(_) => "transaction_failed",
            Self::OperationNotFinished { .. } => "operation_not_finished",
            Self::OperationFailed { .. } => "operation_failed",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::UnsupportedQuery => "unsupported_query",
            Self::Node(_) => "node",
            Self::Config(_) => "config",
            Self::Aborted(_) => "aborted",
        }
    }

    /// Wrap an allowance failure for `required`
    #[must_use]
    pub fn insufficient_allowance(required: u128, source: AllowanceError) -> Self {
        Self::InsufficientAllowance { required, source }
    }
}

impl From<SubmitError> for PublishError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::NonceConflict { attempts } => Self::NonceConflict { attempts },
            SubmitError::Underpriced { attempts } => Self::UnderpricedTransaction { attempts },
            SubmitError::Rejected { .. } | SubmitError::Failed(_) => {
                Self::TransactionFailed(err.to_string())
            }
        }
    }
}

impl From<BidError> for PublishError {
    fn from(err: BidError) -> Self {
        match err {
            BidError::InvalidBid(reason) => Self::InvalidBid(reason),
            BidError::Node(e) => Self::Node(e),
        }
    }
}

impl From<PollError> for PublishError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::OperationNotFinished { id, kind, attempts } => {
                Self::OperationNotFinished { id, kind, attempts }
            }
            PollError::OperationFailed { id, kind, reason } => {
                Self::OperationFailed { id, kind, reason }
            }
            PollError::DeadlineExceeded { .. } => Self::DeadlineExceeded(err.to_string()),
            PollError::Node(e) => Self::Node(e),
        }
    }
}

impl From<QueryError> for PublishError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Unsupported => Self::UnsupportedQuery,
            QueryError::Node(e) => Self::Node(e),
            QueryError::Poll(e) => e.into(),
        }
    }
}

/// Adjustment failures surface as the submission error behind them
impl From<AllowanceError> for PublishError {
    fn from(err: AllowanceError) -> Self {
        match err {
            AllowanceError::Adjust(e) => e.into(),
            AllowanceError::Read(e) => Self::TransactionFailed(format!("allowance read: {e}")),
            AllowanceError::InsufficientAllowance { required, .. } => {
                Self::InsufficientAllowance {
                    required,
                    source: err,
                }
            }
        }
    }
}
