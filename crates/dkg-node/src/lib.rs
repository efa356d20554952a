//! DKG Node
//!
//! Node-facing half of the publish pipeline.
//!
//! # Core Concepts
//!
//! - [`NodeApi`]: the node collaborator; [`HttpNodeClient`] implements it over HTTP
//! - [`RetryPolicy`]: bounded exponential backoff as an inspectable value
//! - [`OperationPoller`]: confirms asynchronous operations to a terminal status
//! - [`BidEstimator`]: stake suggestions, failing fast on invalid values
//! - [`QueryClient`]: SPARQL queries polled to completion
//! - [`NodeGetRequest`]: reads of a created asset's public or private content
//! - [`SessionControl`]: recycling of the shared network session

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod api;
mod bid;
mod error;
mod http;
mod poller;
mod query;
mod retry;
mod types;

pub use api::{NodeApi, SessionControl};
pub use bid::{parse_stake, Bid, BidEstimator};
pub use error::{BidError, NodeError, PollError, QueryError};
pub use http::{HttpNodeClient, NodeConfig};
pub use poller::{OperationPoller, PollConfig};
pub use query::{QueryClient, DEFAULT_REPOSITORY};
pub use retry::RetryPolicy;
pub use types::{
    AssetState, NodeGetRequest, NodeInfo, NodePublishRequest, OperationId, OperationKind,
    OperationRecord, OperationStatus, QueryType, Visibility,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
