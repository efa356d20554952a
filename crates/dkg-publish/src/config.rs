//! Pipeline configuration
//!
//! One serde document with a section per component. Every section has a
//! `Default`, so a partial TOML file (or none at all) is valid. Durations
//! are `*_ms` integers; token amounts are decimal strings.
//!
//! Sources:
//! - TOML via [`PipelineConfig::from_toml_str`] / [`PipelineConfig::from_file`]
//! - environment via [`PipelineConfig::from_env`] and [`signing_keys_from_env`]
//! - a `.env` file under the environment via [`PipelineConfig::from_env_file`]
//!   and [`signing_keys_from_env_file`]; process variables take precedence

use dkg_chain::{amount, AllowanceConfig, KeyMaterial, SubmitPolicy};
use dkg_node::{NodeConfig, PollConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// TOML did not parse
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Environment variable has an unusable value
    #[error("invalid value for {var}: {reason}")]
    Env { var: String, reason: String },

    /// Semantically invalid setting
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Chain connection settings handed to the host's chain collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint
    pub rpc_endpoint: String,
    /// Blockchain name, e.g. `base`
    pub blockchain: String,
    /// Network environment, e.g. `testnet`
    pub environment: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: String::new(),
            blockchain: "base".to_string(),
            environment: "testnet".to_string(),
        }
    }
}

/// Orchestrator policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishPolicy {
    /// Ask the node for a stake suggestion before creating
    pub use_bid_estimate: bool,
    /// Stake used when bid estimation is off
    #[serde(with = "amount")]
    pub fallback_stake: u128,
    /// Pause before the create transaction
    pub pre_create_delay_ms: u64,
    /// Hand the assertion to the node and poll the publish operation
    pub confirm_on_node: bool,
    /// Check the new handle through the chain collaborator
    pub validate_handles: bool,
    /// Replication factor for jobs that do not set one
    pub default_replication_factor: u32,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            use_bid_estimate: true,
            fallback_stake: 0,
            pre_create_delay_ms: 0,
            confirm_on_node: true,
            validate_handles: true,
            default_replication_factor: 1,
        }
    }
}

impl PublishPolicy {
    #[must_use]
    pub fn with_bid_estimate(mut self, enabled: bool) -> Self {
        self.use_bid_estimate = enabled;
        self
    }

    #[must_use]
    pub fn with_fallback_stake(mut self, stake: u128) -> Self {
        self.fallback_stake = stake;
        self
    }

    #[must_use]
    pub fn with_pre_create_delay_ms(mut self, ms: u64) -> Self {
        self.pre_create_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_confirm_on_node(mut self, enabled: bool) -> Self {
        self.confirm_on_node = enabled;
        self
    }

    #[must_use]
    pub fn with_validate_handles(mut self, enabled: bool) -> Self {
        self.validate_handles = enabled;
        self
    }

    #[must_use]
    pub fn with_default_replication_factor(mut self, factor: u32) -> Self {
        self.default_replication_factor = factor;
        self
    }

    #[inline]
    #[must_use]
    pub fn pre_create_delay(&self) -> Duration {
        Duration::from_millis(self.pre_create_delay_ms)
    }
}

/// When a batch counts as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Every job in the batch failed
    #[default]
    AllFailed,
    /// At least one job failed
    AnyFailed,
}

impl BatchFailurePolicy {
    #[inline]
    #[must_use]
    pub fn is_failed(self, failed: usize, total: usize) -> bool {
        match self {
            Self::AllFailed => total > 0 && failed == total,
            Self::AnyFailed => failed > 0,
        }
    }
}

/// Concurrency pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Jobs per batch, each on its own task
    pub workers: usize,
    /// Pause between dispatches within a batch
    pub dispatch_delay_ms: u64,
    /// Pause between batches
    pub batch_pause_ms: u64,
    pub batch_failure: BatchFailurePolicy,
    /// Consecutive failed batches before the session is recycled; 0 never recycles
    pub reconnect_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 7,
            dispatch_delay_ms: 5000,
            batch_pause_ms: 2000,
            batch_failure: BatchFailurePolicy::AllFailed,
            reconnect_threshold: 3,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_dispatch_delay_ms(mut self, ms: u64) -> Self {
        self.dispatch_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_batch_pause_ms(mut self, ms: u64) -> Self {
        self.batch_pause_ms = ms;
        self
    }

    #[must_use]
    pub fn with_batch_failure(mut self, policy: BatchFailurePolicy) -> Self {
        self.batch_failure = policy;
        self
    }

    #[must_use]
    pub fn with_reconnect_threshold(mut self, threshold: u32) -> Self {
        self.reconnect_threshold = threshold;
        self
    }

    #[inline]
    #[must_use]
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub filter: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub node: NodeConfig,
    pub chain: ChainConfig,
    pub allowance: AllowanceConfig,
    pub submit: SubmitPolicy,
    pub poll: PollConfig,
    pub publish: PublishPolicy,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    #[must_use]
    pub fn with_allowance(mut self, allowance: AllowanceConfig) -> Self {
        self.allowance = allowance;
        self
    }

    #[must_use]
    pub fn with_submit(mut self, submit: SubmitPolicy) -> Self {
        self.submit = submit;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_publish(mut self, publish: PublishPolicy) -> Self {
        self.publish = publish;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed TOML or mistyped values
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] or [`ConfigError::Parse`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults overridden by process environment variables
    ///
    /// # Errors
    /// [`ConfigError::Env`] for an unparsable `NODE_PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|var| std::env::var(var).ok())
    }

    /// [`from_env`](Self::from_env) with `path` filling in unset variables
    ///
    /// # Errors
    /// [`ConfigError::Io`] or [`ConfigError::Parse`] for the file, otherwise as
    /// [`from_env`](Self::from_env)
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = read_env_file(path.as_ref())?;
        Self::default().apply_env(env_then(&file))
    }

    /// Override from `lookup`
    ///
    /// Reads `NODE_HOSTNAME`, `NODE_PORT`, `BASE_TESTNET_URI`,
    /// `DKG_BLOCKCHAIN` and `DKG_ENVIRONMENT`.
    ///
    /// # Errors
    /// [`ConfigError::Env`] for an unparsable `NODE_PORT`
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let hostname = lookup("NODE_HOSTNAME");
        let port = lookup("NODE_PORT")
            .map(|p| {
                p.trim().parse::<u16>().map_err(|e| ConfigError::Env {
                    var: "NODE_PORT".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        if hostname.is_some() || port.is_some() {
            let hostname = hostname.unwrap_or_else(|| "localhost".to_string());
            let endpoint = NodeConfig::for_host(&hostname, port.unwrap_or(8900)).endpoint;
            self.node.endpoint = endpoint;
        }
        if let Some(uri) = lookup("BASE_TESTNET_URI") {
            self.chain.rpc_endpoint = uri;
        }
        if let Some(blockchain) = lookup("DKG_BLOCKCHAIN") {
            self.chain.blockchain = blockchain;
        }
        if let Some(environment) = lookup("DKG_ENVIRONMENT") {
            self.chain.environment = environment;
        }
        Ok(self)
    }

    /// Reject settings the pipeline cannot run with
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("node.endpoint is empty".to_string()));
        }
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid("pool.workers must be at least 1".to_string()));
        }
        if self.publish.default_replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "publish.default_replication_factor must be at least 1".to_string(),
            ));
        }
        if !self.publish.use_bid_estimate && self.publish.fallback_stake == 0 {
            return Err(ConfigError::Invalid(
                "publish.fallback_stake must be positive when bid estimation is off".to_string(),
            ));
        }
        if !(self.poll.backoff.is_finite() && self.poll.backoff >= 1.0) {
            return Err(ConfigError::Invalid("poll.backoff must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Signing keys from `PRIVATE_KEY`, `PRIVATE_KEY_1`, `PRIVATE_KEY_2`, …
///
/// Stops at the first missing numbered variable.
///
/// # Errors
/// [`ConfigError::Env`] for a key that is not hex
pub fn signing_keys_from_env() -> Result<Vec<KeyMaterial>, ConfigError> {
    signing_keys_from(|var| std::env::var(var).ok())
}

/// [`signing_keys_from_env`] with `path` filling in unset variables
///
/// # Errors
/// [`ConfigError::Io`] or [`ConfigError::Parse`] for the file, [`ConfigError::Env`]
/// for a key that is not hex
pub fn signing_keys_from_env_file(
    path: impl AsRef<Path>,
) -> Result<Vec<KeyMaterial>, ConfigError> {
    let file = read_env_file(path.as_ref())?;
    signing_keys_from(env_then(&file))
}

/// Variables of a dotenv file, without touching the process environment
fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let io_error = |reason: String| ConfigError::Io {
        path: path.display().to_string(),
        reason,
    };
    let entries = dotenvy::from_path_iter(path).map_err(|e| io_error(e.to_string()))?;
    entries
        .map(|entry| {
            entry.map_err(|e| match e {
                dotenvy::Error::Io(e) => io_error(e.to_string()),
                other => ConfigError::Parse(format!("{}: {other}", path.display())),
            })
        })
        .collect()
}

/// Process environment first, then `file`
fn env_then(file: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
    move |var| std::env::var(var).ok().or_else(|| file.get(var).cloned())
}

/// [`signing_keys_from_env`] over an arbitrary lookup
///
/// # Errors
/// [`ConfigError::Env`] for a key that is not hex
pub fn signing_keys_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<KeyMaterial>, ConfigError> {
    let parse = |var: String, value: String| {
        KeyMaterial::from_hex(&value).map_err(|e| ConfigError::Env {
            var,
            reason: e.to_string(),
        })
    };

    let mut keys = Vec::new();
    if let Some(value) = lookup("PRIVATE_KEY") {
        keys.push(parse("PRIVATE_KEY".to_string(), value)?);
    }
    for n in 1.. {
        let var = format!("PRIVATE_KEY_{n}");
        let Some(value) = lookup(&var) else { break };
        keys.push(parse(var, value)?);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pool.workers, 7);
        assert_eq!(config.pool.reconnect_threshold, 3);
        assert_eq!(config.poll.max_retries, 5);
        assert_eq!(config.submit.fee_bump_percent, 20);
        assert!(config.publish.confirm_on_node);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [node]
            endpoint = "http://node.example:8900"

            [allowance]
            minimum = "5000000000000000000000"

            [pool]
            workers = 3
            batch_failure = "any_failed"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.endpoint, "http://node.example:8900");
        assert_eq!(config.node.http_retries, 5);
        assert_eq!(config.allowance.minimum, 5_000_000_000_000_000_000_000);
        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.batch_failure, BatchFailurePolicy::AnyFailed);
        assert_eq!(config.pool.dispatch_delay_ms, 5000);
    }

    #[test]
    fn toml_roundtrip_preserves_large_amounts() {
        let config = PipelineConfig::default().with_publish(
            PublishPolicy::default()
                .with_bid_estimate(false)
                .with_fallback_stake(u128::MAX),
        );
        let text = config.to_toml_string().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PipelineConfig::from_toml_str("[pool]\nworkers = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[publish]\npre_create_delay_ms = 3000\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.publish.pre_create_delay(), Duration::from_secs(3));

        let missing = PipelineConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn environment_overrides_endpoints() {
        let config = PipelineConfig::default()
            .apply_env(lookup(&[
                ("NODE_HOSTNAME", "10.0.0.5"),
                ("NODE_PORT", "8901"),
                ("BASE_TESTNET_URI", "https://sepolia.base.org"),
                ("DKG_BLOCKCHAIN", "base"),
                ("DKG_ENVIRONMENT", "mainnet"),
            ]))
            .unwrap();
        assert_eq!(config.node.endpoint, "http://10.0.0.5:8901");
        assert_eq!(config.chain.rpc_endpoint, "https://sepolia.base.org");
        assert_eq!(config.chain.environment, "mainnet");
    }

    #[test]
    fn env_file_fills_unset_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# node\nNODE_HOSTNAME=dkg.example\nNODE_PORT=9100\n\
             BASE_TESTNET_URI=\"https://sepolia.base.org\"\n\
             PRIVATE_KEY=0x0a\nPRIVATE_KEY_1=0b\n",
        )
        .unwrap();

        let config = PipelineConfig::from_env_file(&path).unwrap();
        assert_eq!(config.node.endpoint, "http://dkg.example:9100");
        assert_eq!(config.chain.rpc_endpoint, "https://sepolia.base.org");

        let keys = signing_keys_from_env_file(&path).unwrap();
        assert_eq!(keys.len(), 2);

        let missing = PipelineConfig::from_env_file(dir.path().join("absent.env"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn malformed_env_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "NODE_PORT='unterminated\n").unwrap();

        let err = PipelineConfig::from_env_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn bad_port_is_an_env_error() {
        let err = PipelineConfig::default()
            .apply_env(lookup(&[("NODE_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "NODE_PORT"));
    }

    #[test]
    fn signing_keys_stop_at_first_gap() {
        let keys = signing_keys_from(lookup(&[
            ("PRIVATE_KEY", "0x01"),
            ("PRIVATE_KEY_1", "02"),
            ("PRIVATE_KEY_2", "0x03"),
            ("PRIVATE_KEY_4", "0x04"),
        ]))
        .unwrap();
        let bytes: Vec<&[u8]> = keys.iter().map(KeyMaterial::expose).collect();
        assert_eq!(bytes, vec![&[1u8][..], &[2u8][..], &[3u8][..]]);
    }

    #[test]
    fn non_hex_key_is_rejected() {
        let err = signing_keys_from(lookup(&[("PRIVATE_KEY", "not-a-key")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let zero_workers = PipelineConfig::default().with_pool(PoolConfig::default().with_workers(0));
        assert!(zero_workers.validate().is_err());

        let zero_replication = PipelineConfig::default()
            .with_publish(PublishPolicy::default().with_default_replication_factor(0));
        assert!(zero_replication.validate().is_err());

        let no_endpoint =
            PipelineConfig::default().with_node(NodeConfig::default().with_endpoint(" "));
        assert!(no_endpoint.validate().is_err());

        let no_stake = PipelineConfig::default()
            .with_publish(PublishPolicy::default().with_bid_estimate(false));
        assert!(no_stake.validate().is_err());
    }

    #[test]
    fn batch_failure_policies() {
        assert!(BatchFailurePolicy::AllFailed.is_failed(3, 3));
        assert!(!BatchFailurePolicy::AllFailed.is_failed(2, 3));
        assert!(!BatchFailurePolicy::AllFailed.is_failed(0, 0));
        assert!(BatchFailurePolicy::AnyFailed.is_failed(1, 3));
        assert!(!BatchFailurePolicy::AnyFailed.is_failed(0, 3));
    }
}
