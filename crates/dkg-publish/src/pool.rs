//! Concurrency Pool
//!
//! Drains publish jobs in batches of `workers`, each job on its own task:
//! - identities rotate round-robin over the global job index
//! - dispatches within a batch are spaced by `dispatch_delay`
//! - batches are separated by `batch_pause`
//! - consecutive failed batches recycle the shared node session
//!
//! Per-identity nonce ordering is enforced by the submitter, so jobs sharing
//! an identity may run in the same batch.

use crate::config::{ConfigError, PipelineConfig, PoolConfig};
use crate::error::PublishError;
use crate::orchestrator::PublishOrchestrator;
use crate::types::{JobId, PublishFailure, PublishJob, PublishOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dkg_chain::{Address, AssetHandle, ChainApi, ChainError, KeyMaterial, SigningIdentity};
use dkg_node::{HttpNodeClient, NodeApi, SessionControl};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Signing identities keyed by address, in registration order
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: DashMap<Address, Arc<SigningIdentity>>,
    order: RwLock<Vec<Address>>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and register an identity per key
    ///
    /// # Errors
    /// The first key the chain collaborator cannot derive an address for
    pub fn from_keys(
        keys: impl IntoIterator<Item = KeyMaterial>,
        chain: &dyn ChainApi,
    ) -> Result<Self, ChainError> {
        let registry = Self::new();
        for key in keys {
            registry.insert(SigningIdentity::from_key(key, chain)?);
        }
        Ok(registry)
    }

    /// Register `identity`; an already registered address keeps its state
    pub fn insert(&self, identity: SigningIdentity) -> Arc<SigningIdentity> {
        let address = *identity.address();
        let mut order = self.order.write();
        let entry = self
            .identities
            .entry(address)
            .or_insert_with(|| {
                order.push(address);
                Arc::new(identity)
            });
        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn get(&self, address: &Address) -> Option<Arc<SigningIdentity>> {
        self.identities.get(address).map(|e| Arc::clone(e.value()))
    }

    /// Identity serving the job at `index`
    #[must_use]
    pub fn for_job(&self, index: usize) -> Option<Arc<SigningIdentity>> {
        let order = self.order.read();
        if order.is_empty() {
            return None;
        }
        self.get(&order[index % order.len()])
    }

    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.order.read().clone()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one pool job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: JobId,
    /// Position in the submitted job list
    pub index: usize,
    pub identity: Address,
    pub result: Result<PublishOutcome, PublishFailure>,
}

impl JobReport {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of a [`PublishPool::run`]
#[derive(Debug, Clone)]
pub struct PoolReport {
    /// One entry per job, in job order
    pub jobs: Vec<JobReport>,
    pub batches: usize,
    pub failed_batches: usize,
    pub recycles: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PoolReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }

    /// Handles of successful jobs, in job order
    #[must_use]
    pub fn handles(&self) -> Vec<&AssetHandle> {
        self.jobs
            .iter()
            .filter_map(|j| j.result.as_ref().ok().map(|o| &o.handle))
            .collect()
    }
}

/// Runs publish jobs across identities
pub struct PublishPool {
    orchestrator: Arc<PublishOrchestrator>,
    identities: Arc<IdentityRegistry>,
    session: Arc<dyn SessionControl>,
    config: PoolConfig,
}

impl std::fmt::Debug for PublishPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishPool")
            .field("identities", &self.identities.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PublishPool {
    #[must_use]
    pub fn new(
        orchestrator: Arc<PublishOrchestrator>,
        identities: Arc<IdentityRegistry>,
        session: Arc<dyn SessionControl>,
        config: PoolConfig,
    ) -> Self {
        Self {
            orchestrator,
            identities,
            session,
            config,
        }
    }

    /// Validate `config` and wire a pool over an HTTP node session
    ///
    /// # Errors
    /// - [`PublishError::Config`] for invalid settings, unusable keys or an
    ///   empty key list
    /// - [`PublishError::Node`] when the HTTP client cannot be built
    pub fn connect(
        config: &PipelineConfig,
        chain: Arc<dyn ChainApi>,
        keys: impl IntoIterator<Item = KeyMaterial>,
    ) -> Result<Self, PublishError> {
        config.validate()?;
        let identities = IdentityRegistry::from_keys(keys, chain.as_ref())
            .map_err(|e| ConfigError::Invalid(format!("signing key rejected: {e}")))?;
        if identities.is_empty() {
            return Err(ConfigError::Invalid("no signing keys configured".to_string()).into());
        }

        let node = Arc::new(HttpNodeClient::new(config.node.clone())?);
        let orchestrator =
            PublishOrchestrator::new(chain, Arc::clone(&node) as Arc<dyn NodeApi>, config);
        info!(
            endpoint = %config.node.endpoint,
            identities = identities.len(),
            workers = config.pool.workers,
            "publish pool connected"
        );
        Ok(Self::new(
            Arc::new(orchestrator),
            Arc::new(identities),
            node,
            config.pool.clone(),
        ))
    }

    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<PublishOrchestrator> {
        &self.orchestrator
    }

    #[inline]
    #[must_use]
    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Publish every job and report each outcome
    ///
    /// A failing or panicking job is recorded in its [`JobReport`] and never
    /// cancels the other jobs.
    ///
    /// # Errors
    /// [`PublishError::Config`] when no identity is registered
    pub async fn run(&self, jobs: Vec<PublishJob>) -> Result<PoolReport, PublishError> {
        if self.identities.is_empty() {
            return Err(ConfigError::Invalid("no signing identities registered".to_string()).into());
        }

        let workers = self.config.workers.max(1);
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(jobs.len());
        let mut batches = 0usize;
        let mut failed_batches = 0usize;
        let mut recycles = 0usize;
        let mut consecutive_failures = 0u32;

        info!(jobs = jobs.len(), workers, identities = self.identities.len(), "pool starting");

        for (batch, chunk) in jobs.chunks(workers).enumerate() {
            if batch > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }

            let mut tasks = Vec::with_capacity(chunk.len());
            for (offset, job) in chunk.iter().enumerate() {
                if offset > 0 {
                    tokio::time::sleep(self.config.dispatch_delay()).await;
                }
                let index = batch * workers + offset;
                let Some(identity) = self.identities.for_job(index) else {
                    return Err(
                        ConfigError::Invalid("no signing identities registered".to_string()).into(),
                    );
                };
                let id = JobId::new();
                let address = *identity.address();
                let orchestrator = Arc::clone(&self.orchestrator);
                let job = job.clone();
                let span = info_span!("job", job_id = %id, index, identity = %address);

                debug!(job_id = %id, index, identity = %address, "dispatching job");
                let handle = tokio::spawn(
                    async move {
                        orchestrator
                            .publish_graph(
                                &job.payload,
                                job.replication_factor,
                                job.visibility,
                                identity,
                            )
                            .await
                    }
                    .instrument(span),
                );
                tasks.push((id, index, address, handle));
            }

            let size = tasks.len();
            let mut failed = 0usize;
            for (id, index, identity, handle) in tasks {
                let result = handle.await.unwrap_or_else(|e| {
                    error!(job_id = %id, index, error = %e, "publish task aborted");
                    Err(PublishFailure::from(PublishError::Aborted(e.to_string())))
                });
                if result.is_err() {
                    failed += 1;
                }
                reports.push(JobReport {
                    id,
                    index,
                    identity,
                    result,
                });
            }
            batches += 1;

            if self.config.batch_failure.is_failed(failed, size) {
                failed_batches += 1;
                consecutive_failures += 1;
                metrics::counter!("dkg_pool_batches_total", "result" => "failed").increment(1);
                warn!(batch, failed, size, consecutive_failures, "batch failed");

                let threshold = self.config.reconnect_threshold;
                if threshold > 0 && consecutive_failures >= threshold {
                    match self.session.recycle() {
                        Ok(()) => {
                            recycles += 1;
                            info!(consecutive_failures, "node session recycled");
                        }
                        Err(e) => error!(error = %e, "node session recycle failed"),
                    }
                    consecutive_failures = 0;
                }
            } else {
                metrics::counter!("dkg_pool_batches_total", "result" => "ok").increment(1);
                debug!(batch, failed, size, "batch done");
                consecutive_failures = 0;
            }
        }

        let report = PoolReport {
            jobs: reports,
            batches,
            failed_batches,
            recycles,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            batches,
            recycles,
            "pool finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkg_test_utils::{test_identity, test_key, ScriptedChain};

    #[test]
    fn registry_rotates_in_registration_order() {
        let registry = IdentityRegistry::new();
        let a = registry.insert(test_identity(1));
        let b = registry.insert(test_identity(2));

        let picked: Vec<Address> = (0..5)
            .map(|i| *registry.for_job(i).unwrap().address())
            .collect();
        assert_eq!(
            picked,
            vec![*a.address(), *b.address(), *a.address(), *b.address(), *a.address()]
        );
    }

    #[test]
    fn duplicate_registration_keeps_one_identity() {
        let registry = IdentityRegistry::new();
        let first = registry.insert(test_identity(1));
        let second = registry.insert(test_identity(1));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_registry_has_no_identity() {
        assert!(IdentityRegistry::new().for_job(0).is_none());
    }

    #[test]
    fn from_keys_derives_addresses() {
        let chain = ScriptedChain::new();
        let registry = IdentityRegistry::from_keys([test_key(1), test_key(2)], &chain).unwrap();
        assert_eq!(
            registry.addresses(),
            vec![*test_identity(1).address(), *test_identity(2).address()]
        );

        let err = IdentityRegistry::from_keys([KeyMaterial::new(Vec::new())], &chain).unwrap_err();
        assert!(matches!(err, ChainError::Signing(_)));
    }

    #[test]
    fn connect_requires_keys_and_valid_config() {
        let chain: Arc<dyn ChainApi> = Arc::new(ScriptedChain::new());
        let config = PipelineConfig::default();

        let pool = PublishPool::connect(&config, Arc::clone(&chain), [test_key(1), test_key(2)])
            .unwrap();
        assert_eq!(pool.identities().len(), 2);

        let no_keys = PublishPool::connect(&config, Arc::clone(&chain), Vec::<KeyMaterial>::new());
        assert!(matches!(no_keys, Err(PublishError::Config(_))));

        let bad = config.with_pool(PoolConfig::default().with_workers(0));
        assert!(matches!(
            PublishPool::connect(&bad, chain, [test_key(1)]),
            Err(PublishError::Config(_))
        ));
    }
}
