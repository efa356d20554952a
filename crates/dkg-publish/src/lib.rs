//! DKG Publish - knowledge asset publishing pipeline
//!
//! Ties the assertion formatter, chain and node components together:
//! - [`PublishOrchestrator`] runs one publish from allowance to asset handle
//! - [`PublishPool`] fans jobs out across signing identities with rate
//!   limiting and session recycling
//! - [`PipelineConfig`] loads every component's settings from TOML or the
//!   environment
//! - [`telemetry`] installs the tracing subscriber
//!
//! # Example
//!
//! ```rust,ignore
//! use dkg_publish::prelude::*;
//!
//! # async fn example(chain: std::sync::Arc<dyn dkg_chain::ChainApi>) -> Result<(), PublishError> {
//! let config = PipelineConfig::from_env()?;
//! telemetry::init_from_config(&config.logging);
//!
//! let pool = PublishPool::connect(&config, chain, signing_keys_from_env()?)?;
//! let jobs = vec![PublishJob::new(GraphPayload::public(serde_json::json!({
//!     "@context": "http://schema.org",
//!     "@type": "Dataset",
//!     "name": "example"
//! })))];
//!
//! let report = pool.run(jobs).await?;
//! println!("{} published, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod telemetry;
pub mod types;

pub use config::{
    signing_keys_from, signing_keys_from_env, signing_keys_from_env_file, BatchFailurePolicy,
    ChainConfig, ConfigError, LoggingConfig, PipelineConfig, PoolConfig, PublishPolicy,
};
pub use error::PublishError;
pub use orchestrator::PublishOrchestrator;
pub use pool::{IdentityRegistry, JobReport, PoolReport, PublishPool};
pub use types::{
    JobId, PublishFailure, PublishJob, PublishOutcome, PublishProgress, PublishRequest, Visibility,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the pipeline
    pub use crate::telemetry;
    pub use crate::{
        signing_keys_from_env, PipelineConfig, PoolReport, PublishError, PublishFailure,
        PublishJob, PublishOrchestrator, PublishOutcome, PublishPool, PublishRequest, Visibility,
    };
    pub use dkg_assertion::{format_graph, GraphPayload};
    pub use dkg_chain::{AssetHandle, SigningIdentity};
    pub use dkg_node::AssetState;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
