//! Publish Orchestrator
//!
//! Sequences one publish end to end:
//! - ensure the configured minimum allowance
//! - estimate the stake (or use the fallback stake)
//! - reserve the stake against the identity's allowance, raising it when
//!   short, and hold that reservation until the create settles
//! - submit the create transaction and await its receipt
//! - build and check the asset handle
//! - optionally hand the assertion to the node and confirm the operation
//!
//! Failures carry a [`PublishProgress`] so an approval that went through, or
//! an asset that was created before a later stage failed, is never hidden.

use crate::config::{PipelineConfig, PublishPolicy};
use crate::error::PublishError;
use crate::types::{PublishFailure, PublishOutcome, PublishProgress, PublishRequest, Visibility};
use dkg_assertion::{format_graph, ContentHash, GraphPayload};
use dkg_chain::{
    AllowanceCheck, AllowanceManager, AssetHandle, ChainApi, SigningIdentity,
    TransactionSubmitter, TxCall, TxHash,
};
use dkg_node::{
    AssetState, Bid, BidEstimator, NodeApi, NodeGetRequest, NodeInfo, NodePublishRequest,
    OperationId, OperationKind, OperationPoller, QueryClient,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Drives publishes, queries and allowance adjustments against one chain and
/// one node
pub struct PublishOrchestrator {
    chain: Arc<dyn ChainApi>,
    node: Arc<dyn NodeApi>,
    submitter: Arc<TransactionSubmitter>,
    allowance: AllowanceManager,
    bids: BidEstimator,
    poller: Arc<OperationPoller>,
    queries: QueryClient,
    policy: PublishPolicy,
}

impl std::fmt::Debug for PublishOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOrchestrator")
            .field("allowance", &self.allowance)
            .field("poller", &self.poller)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PublishOrchestrator {
    /// Wire the components from `config`
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>, node: Arc<dyn NodeApi>, config: &PipelineConfig) -> Self {
        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::clone(&chain),
            config.submit.clone(),
        ));
        let poller = Arc::new(OperationPoller::new(Arc::clone(&node), config.poll.policy()));
        Self {
            allowance: AllowanceManager::new(Arc::clone(&submitter), config.allowance.clone()),
            bids: BidEstimator::new(Arc::clone(&node)),
            queries: QueryClient::new(Arc::clone(&node), Arc::clone(&poller)),
            chain,
            node,
            submitter,
            poller,
            policy: config.publish.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    #[inline]
    #[must_use]
    pub fn chain(&self) -> &Arc<dyn ChainApi> {
        &self.chain
    }

    #[inline]
    #[must_use]
    pub fn poller(&self) -> &Arc<OperationPoller> {
        &self.poller
    }

    #[inline]
    #[must_use]
    pub fn submitter(&self) -> &Arc<TransactionSubmitter> {
        &self.submitter
    }

    /// Publish a formatted assertion
    ///
    /// # Errors
    /// A [`PublishFailure`] whose `error` names the failing stage and whose
    /// `progress` records what had already happened
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, PublishFailure> {
        let span = info_span!(
            "publish",
            content_id = %request.assertion.content_id().short(),
            identity = %request.identity.address(),
            replication = request.replication_factor,
        );

        async {
            let mut progress = PublishProgress::default();
            match self.run(&request, &mut progress).await {
                Ok(outcome) => {
                    metrics::counter!("dkg_publish_total", "result" => "success").increment(1);
                    info!(handle = %outcome.handle, stake = outcome.stake, "publish complete");
                    Ok(outcome)
                }
                Err(error) => {
                    metrics::counter!("dkg_publish_total", "result" => error.kind()).increment(1);
                    error!(
                        error = %error,
                        kind = error.kind(),
                        allowance_raised = progress.allowance_raised(),
                        created = progress.is_created(),
                        "publish failed"
                    );
                    Err(PublishFailure::new(error, progress))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Format `payload` and publish it
    ///
    /// `replication_factor` of `None` uses the configured default.
    ///
    /// # Errors
    /// [`PublishError::InvalidGraph`] for malformed payloads, otherwise as
    /// [`publish`](Self::publish)
    pub async fn publish_graph(
        &self,
        payload: &GraphPayload,
        replication_factor: Option<u32>,
        visibility: Visibility,
        identity: Arc<SigningIdentity>,
    ) -> Result<PublishOutcome, PublishFailure> {
        let assertion = format_graph(payload).map_err(|e| {
            metrics::counter!("dkg_publish_total", "result" => "invalid_graph").increment(1);
            warn!(error = %e, identity = %identity.address(), "rejecting graph");
            PublishFailure::from(PublishError::from(e))
        })?;
        let request = PublishRequest::new(assertion, identity)
            .with_replication_factor(
                replication_factor.unwrap_or(self.policy.default_replication_factor),
            )
            .with_visibility(visibility);
        self.publish(request).await
    }

    /// Run a SPARQL query and return its result payload
    ///
    /// # Errors
    /// [`PublishError::UnsupportedQuery`], [`PublishError::Node`] or a poll
    /// outcome (`OperationFailed`, `OperationNotFinished`)
    pub async fn query(&self, query: &str, repository: &str) -> Result<Value, PublishError> {
        Ok(self.queries.query(query, repository).await?)
    }

    /// Resolve a created asset's content through the node
    ///
    /// # Errors
    /// [`PublishError::Node`] when the read cannot be started, otherwise a
    /// poll outcome (`OperationFailed`, `OperationNotFinished`)
    pub async fn get_asset(
        &self,
        handle: &AssetHandle,
        state: AssetState,
        visibility: Visibility,
    ) -> Result<Value, PublishError> {
        let request = NodeGetRequest::new(handle.as_str())
            .with_state(state)
            .with_visibility(visibility);
        let id = self.node.get(&request).await?;
        info!(operation_id = %id, handle = %handle, ?state, ?visibility, "asset read started");
        let record = self.poller.poll(&id, &OperationKind::Get).await?;
        Ok(record.data)
    }

    /// Node version descriptor; doubles as a connectivity check
    ///
    /// # Errors
    /// [`PublishError::Node`] when the node is unreachable
    pub async fn node_info(&self) -> Result<NodeInfo, PublishError> {
        Ok(self.node.info().await?)
    }

    /// Raise `identity`'s allowance by `delta`
    ///
    /// # Errors
    /// The submission error class of the failed transaction
    pub async fn increase_allowance(
        &self,
        identity: &SigningIdentity,
        delta: u128,
    ) -> Result<TxHash, PublishError> {
        Ok(self.allowance.increase_allowance(identity, delta).await?)
    }

    /// Lower `identity`'s allowance by `delta`
    ///
    /// # Errors
    /// The submission error class of the failed transaction
    pub async fn decrease_allowance(
        &self,
        identity: &SigningIdentity,
        delta: u128,
    ) -> Result<TxHash, PublishError> {
        Ok(self.allowance.decrease_allowance(identity, delta).await?)
    }

    async fn run(
        &self,
        request: &PublishRequest,
        progress: &mut PublishProgress,
    ) -> Result<PublishOutcome, PublishError> {
        let identity = &request.identity;
        let content_id = request.assertion.content_id();
        let byte_size = u64::try_from(request.assertion.byte_size()).unwrap_or(u64::MAX);
        progress.content_id = Some(content_id);

        let minimum = self.allowance.config().minimum;
        let mut allowance = self.ensure_allowance(identity, minimum, progress).await?;

        let (stake, bid) = self
            .stake_for(content_id, byte_size, request.replication_factor)
            .await?;
        progress.bid = bid;

        let delay = self.policy.pre_create_delay();
        if !delay.is_zero() {
            debug!(?delay, "pausing before create");
            tokio::time::sleep(delay).await;
        }

        // Held until the create settles; raises the allowance when the stake
        // exceeds what is left.
        if stake > minimum {
            debug!(stake, minimum, "stake exceeds minimum allowance");
        }
        let (check, reservation) = self
            .allowance
            .reserve(identity, stake)
            .await
            .map_err(|e| PublishError::insufficient_allowance(stake, e))?;
        progress.record_allowance(&check);
        if check.approval_tx().is_some() {
            allowance = check;
        }

        let submitted = self
            .submitter
            .submit(
                identity,
                TxCall::CreateAsset {
                    content_id,
                    byte_size,
                    replication_factor: request.replication_factor,
                    stake,
                },
            )
            .await;
        let confirmed = match submitted {
            Ok(confirmed) => {
                reservation.commit();
                confirmed
            }
            Err(e) => {
                reservation.abandon();
                return Err(e.into());
            }
        };
        let create_tx = confirmed.receipt.tx_hash;
        progress.create_tx = Some(create_tx);

        let asset_index = confirmed.receipt.asset_index.ok_or_else(|| {
            PublishError::TransactionFailed(format!("receipt for {create_tx} carries no asset index"))
        })?;

        let handle = AssetHandle::build(&self.chain.network(), asset_index);
        progress.handle = Some(handle.clone());
        info!(handle = %handle, tx = %create_tx, "asset created");

        let handle_valid = self.check_handle(&handle).await;

        let node_operation = if self.policy.confirm_on_node {
            Some(self.confirm_on_node(request, &handle).await?)
        } else {
            None
        };

        Ok(PublishOutcome {
            handle,
            content_id,
            byte_size,
            stake,
            bid,
            allowance,
            create_tx,
            asset_index,
            handle_valid,
            node_operation,
        })
    }

    async fn ensure_allowance(
        &self,
        identity: &SigningIdentity,
        required: u128,
        progress: &mut PublishProgress,
    ) -> Result<AllowanceCheck, PublishError> {
        let check = self
            .allowance
            .ensure_allowance(identity, required)
            .await
            .map_err(|e| PublishError::insufficient_allowance(required, e))?;
        progress.record_allowance(&check);
        Ok(check)
    }

    async fn stake_for(
        &self,
        content_id: ContentHash,
        byte_size: u64,
        replication_factor: u32,
    ) -> Result<(u128, Option<Bid>), PublishError> {
        if self.policy.use_bid_estimate {
            let bid = self
                .bids
                .get_bid(content_id, byte_size, replication_factor)
                .await?;
            return Ok((bid.stake, Some(bid)));
        }
        if self.policy.fallback_stake == 0 {
            return Err(PublishError::InvalidBid(
                "bid estimation disabled and fallback stake is zero".to_string(),
            ));
        }
        Ok((self.policy.fallback_stake, None))
    }

    async fn check_handle(&self, handle: &AssetHandle) -> Option<bool> {
        if !self.policy.validate_handles {
            return None;
        }
        match self.chain.validate_handle(handle).await {
            Ok(true) => Some(true),
            Ok(false) => {
                warn!(handle = %handle, "handle failed validation");
                Some(false)
            }
            Err(e) => {
                warn!(handle = %handle, error = %e, "handle validation unavailable");
                None
            }
        }
    }

    async fn confirm_on_node(
        &self,
        request: &PublishRequest,
        handle: &AssetHandle,
    ) -> Result<OperationId, PublishError> {
        let mut body =
            NodePublishRequest::public(handle.as_str(), &request.assertion, request.replication_factor);
        if request.visibility == Visibility::Private {
            body = body.with_private(&request.assertion);
        }
        let id = self.node.publish(&body).await?;
        debug!(operation_id = %id, "node publish started");
        self.poller.poll(&id, &OperationKind::Publish).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkg_chain::{AllowanceConfig, ChainError};
    use dkg_node::OperationStatus;
    use dkg_test_utils::{
        sample_payload, sample_private_payload, test_identity, ScriptedChain, ScriptedNode,
        FIRST_ASSET_INDEX,
    };
    use std::time::Duration;

    const MINIMUM: u128 = 10_000;

    struct Harness {
        chain: Arc<ScriptedChain>,
        node: Arc<ScriptedNode>,
        orchestrator: PublishOrchestrator,
        identity: Arc<SigningIdentity>,
    }

    fn harness(config: PipelineConfig) -> Harness {
        let chain = Arc::new(ScriptedChain::new());
        let node = Arc::new(ScriptedNode::new());
        let orchestrator = PublishOrchestrator::new(
            Arc::clone(&chain) as Arc<dyn ChainApi>,
            Arc::clone(&node) as Arc<dyn NodeApi>,
            &config,
        );
        Harness {
            chain,
            node,
            orchestrator,
            identity: Arc::new(test_identity(1)),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_allowance(AllowanceConfig::default().with_minimum(MINIMUM))
    }

    #[tokio::test(start_paused = true)]
    async fn publish_approves_creates_and_confirms() {
        let h = harness(config());

        let outcome = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap();

        assert_eq!(outcome.asset_index, FIRST_ASSET_INDEX);
        assert_eq!(
            outcome.handle.as_str(),
            format!(
                "did:dkg:base:84532/0x{}/{FIRST_ASSET_INDEX}",
                "b8".repeat(20)
            )
        );
        assert_eq!(outcome.stake, ScriptedNode::DEFAULT_BID);
        assert_eq!(outcome.bid.map(|b| b.replication_factor), Some(1));
        assert!(matches!(outcome.allowance, AllowanceCheck::Approved { amount: MINIMUM, .. }));
        assert_eq!(outcome.handle_valid, Some(true));
        assert!(outcome.node_operation.is_some());

        assert_eq!(h.chain.sent_count("approve"), 1);
        assert_eq!(h.chain.sent_count("create_asset"), 1);
        assert_eq!(
            h.chain.allowance_of(h.identity.address()),
            MINIMUM - ScriptedNode::DEFAULT_BID
        );
        assert_eq!(h.node.published().len(), 1);
        assert_eq!(h.node.published()[0].asset_handle, outcome.handle.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn stake_above_minimum_raises_allowance_again() {
        let h = harness(config());
        h.node.set_bid(Some("25000"));

        let outcome = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap();

        assert_eq!(outcome.stake, 25_000);
        assert_eq!(h.chain.sent_count("approve"), 2);
        assert!(matches!(outcome.allowance, AllowanceCheck::Approved { amount: 25_000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_allowance_skips_reads_on_second_publish() {
        let h = harness(config());
        h.chain.set_allowance(*h.identity.address(), MINIMUM * 10);

        for n in 0..2 {
            h.orchestrator
                .publish_graph(&sample_payload(n), None, Visibility::Public, Arc::clone(&h.identity))
                .await
                .unwrap();
        }

        assert_eq!(h.chain.allowance_reads(), 1);
        assert_eq!(h.chain.sent_count("approve"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_bid_stops_before_create() {
        let h = harness(config());
        h.node.set_bid(Some("0"));

        let failure = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::InvalidBid(_)));
        assert!(failure.progress.allowance_raised());
        assert!(failure.progress.content_id.is_some());
        assert_eq!(h.chain.sent_count("create_asset"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_stake_skips_estimation() {
        let h = harness(config().with_publish(
            PublishPolicy::default()
                .with_bid_estimate(false)
                .with_fallback_stake(500),
        ));

        let outcome = h
            .orchestrator
            .publish_graph(&sample_payload(1), Some(2), Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap();

        assert_eq!(outcome.stake, 500);
        assert!(outcome.bid.is_none());
        assert_eq!(h.node.bid_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_fallback_stake_is_invalid_bid() {
        let h = harness(config().with_publish(PublishPolicy::default().with_bid_estimate(false)));

        let failure = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::InvalidBid(_)));
        assert_eq!(h.node.bid_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_create_is_never_success() {
        let h = harness(config());
        h.chain.revert_creates(true);

        let failure = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::TransactionFailed(_)));
        assert!(failure.progress.allowance_raised());
        assert!(!failure.progress.is_created());
        assert!(h.node.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn node_failure_keeps_created_handle() {
        let h = harness(config());
        h.node.script_statuses([OperationStatus::Failed]);

        let failure = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::OperationFailed { .. }));
        assert!(failure.progress.is_created());
        assert!(failure.progress.create_tx.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn node_confirmation_can_be_disabled() {
        let h = harness(
            config().with_publish(PublishPolicy::default().with_confirm_on_node(false)),
        );

        let outcome = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap();

        assert!(outcome.node_operation.is_none());
        assert!(h.node.published().is_empty());
        assert_eq!(h.node.status_fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_controls_private_statements() {
        let h = harness(config());

        for visibility in [Visibility::Public, Visibility::Private] {
            h.orchestrator
                .publish_graph(&sample_private_payload(7), None, visibility, Arc::clone(&h.identity))
                .await
                .unwrap();
        }

        let published = h.node.published();
        assert!(published[0].private_assertion.is_none());
        assert!(published[1].private_assertion.is_some());
        assert_eq!(published[0].assertion_id, published[1].assertion_id);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_create_delay_is_honored() {
        let h = harness(
            config().with_publish(PublishPolicy::default().with_pre_create_delay_ms(3000)),
        );

        let started = tokio::time::Instant::now();
        h.orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_graph_is_rejected_without_chain_calls() {
        let h = harness(config());

        let failure = h
            .orchestrator
            .publish_graph(
                &GraphPayload::public(serde_json::json!(["not", "a", "graph"])),
                None,
                Visibility::Public,
                Arc::clone(&h.identity),
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::InvalidGraph(_)));
        assert_eq!(h.chain.allowance_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_nonce_conflict_surfaces_with_attempts() {
        let h = harness(
            config().with_submit(dkg_chain::SubmitPolicy::default().with_max_nonce_retries(3)),
        );
        h.chain.set_allowance(*h.identity.address(), MINIMUM);
        h.chain.fail_sends(std::iter::repeat(ChainError::NonceTooLow).take(3));

        let failure = h
            .orchestrator
            .publish_graph(&sample_payload(1), None, Visibility::Public, Arc::clone(&h.identity))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, PublishError::NonceConflict { attempts: 3 }));
        assert!(failure.error.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn query_and_node_info() {
        let h = harness(config());

        let info = h.orchestrator.node_info().await.unwrap();
        assert_eq!(info.version, "6.5.0");

        let data = h
            .orchestrator
            .query("SELECT ?s WHERE { ?s ?p ?o }", dkg_node::DEFAULT_REPOSITORY)
            .await
            .unwrap();
        assert!(data.get("operationId").is_some());

        let err = h
            .orchestrator
            .query("INSERT DATA { <a> <b> <c> }", dkg_node::DEFAULT_REPOSITORY)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::UnsupportedQuery));
    }

    #[tokio::test(start_paused = true)]
    async fn published_asset_reads_back_public_and_private() {
        let h = harness(config());
        let outcome = h
            .orchestrator
            .publish_graph(&sample_private_payload(5), None, Visibility::Private, Arc::clone(&h.identity))
            .await
            .unwrap();

        let public = h
            .orchestrator
            .get_asset(&outcome.handle, AssetState::LatestFinalized, Visibility::Public)
            .await
            .unwrap();
        let private = h
            .orchestrator
            .get_asset(&outcome.handle, AssetState::Latest, Visibility::Private)
            .await
            .unwrap();

        let statements = |v: &Value| v["assertion"].as_array().unwrap().len();
        assert!(statements(&public) > 0);
        assert!(private["assertion"].to_string().contains("secret-5"));
        assert!(!public["assertion"].to_string().contains("secret-5"));

        let gets = h.node.gets();
        assert_eq!(gets.len(), 2);
        assert_eq!(gets[0].id, outcome.handle.as_str());
        assert_eq!(gets[1].content_visibility, Visibility::Private);
        assert_eq!(gets[1].state, AssetState::Latest);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_asset_read_surfaces_operation_failure() {
        let h = harness(config());
        h.node.script_statuses([OperationStatus::Failed]);
        let handle = AssetHandle::build(&h.chain.network(), FIRST_ASSET_INDEX);

        let err = h
            .orchestrator
            .get_asset(&handle, AssetState::default(), Visibility::Public)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::OperationFailed { kind: OperationKind::Get, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn allowance_adjustments_reach_the_chain() {
        let h = harness(config());
        h.chain.set_allowance(*h.identity.address(), 1_000);

        h.orchestrator
            .increase_allowance(&h.identity, 500)
            .await
            .unwrap();
        assert_eq!(h.chain.allowance_of(h.identity.address()), 1_500);

        h.orchestrator
            .decrease_allowance(&h.identity, 200)
            .await
            .unwrap();
        assert_eq!(h.chain.allowance_of(h.identity.address()), 1_300);
        assert_eq!(h.identity.last_nonce().await, Some(1));
    }
}
