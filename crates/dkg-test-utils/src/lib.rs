//! Testing utilities for the DKG publish workspace
//!
//! Scripted in-memory collaborators with call counters, plus fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use dkg_assertion::{ContentHash, GraphPayload};
use dkg_chain::{
    Address, AssetHandle, ChainApi, ChainError, KeyMaterial, NetworkInfo, Receipt, SignedTx,
    SigningIdentity, TxCall, TxHash, TxRequest,
};
use dkg_node::{
    NodeApi, NodeError, NodeGetRequest, NodeInfo, NodePublishRequest, OperationId, OperationKind,
    OperationRecord, OperationStatus, QueryType, SessionControl, Visibility,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Base index for assets created on a [`ScriptedChain`]
pub const FIRST_ASSET_INDEX: u64 = 54_085;

pub fn test_network() -> NetworkInfo {
    NetworkInfo {
        blockchain: "base".to_string(),
        chain_id: 84_532,
        asset_contract: Address::new([0xb8; 20]),
    }
}

pub fn test_key(seed: u8) -> KeyMaterial {
    KeyMaterial::new(vec![seed; 32])
}

/// Identity whose address matches what [`ScriptedChain`] derives
pub fn test_identity(seed: u8) -> SigningIdentity {
    let key = test_key(seed);
    let address = derive_address(&key);
    SigningIdentity::new(key, address)
}

fn derive_address(key: &KeyMaterial) -> Address {
    let digest = ContentHash::compute(key.expose());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[..20]);
    Address::new(bytes)
}

/// A small public graph; different `n` give different content
pub fn sample_payload(n: u32) -> GraphPayload {
    GraphPayload::public(json!({
        "@context": "http://schema.org",
        "@id": format!("urn:asset:{n}"),
        "@type": "Dataset",
        "name": format!("asset {n}"),
        "size": n
    }))
}

/// A payload with a private sub-graph
pub fn sample_private_payload(n: u32) -> GraphPayload {
    sample_payload(n).with_private(json!({
        "@context": "http://schema.org",
        "@id": format!("urn:asset:{n}"),
        "identifier": format!("secret-{n}")
    }))
}

#[derive(Debug, Default)]
struct ChainState {
    allowances: HashMap<Address, u128>,
    pending_nonces: HashMap<Address, u64>,
    signed: HashMap<TxHash, TxRequest>,
    receipts: HashMap<TxHash, Receipt>,
    handles: HashSet<AssetHandle>,
    send_errors: VecDeque<ChainError>,
    revert_creates: bool,
    next_index: u64,
    block: u64,
    sent: Vec<TxRequest>,
}

/// In-memory ledger
///
/// Enforces nonces (a reused nonce is `NonceTooLow`), applies allowance
/// calls, and makes creations spend allowance and assign increasing indices.
#[derive(Debug)]
pub struct ScriptedChain {
    state: Mutex<ChainState>,
    gas_price: u128,
    allowance_reads: AtomicUsize,
    nonce_reads: AtomicUsize,
}

impl Default for ScriptedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                next_index: FIRST_ASSET_INDEX,
                ..ChainState::default()
            }),
            gas_price: 1_000,
            allowance_reads: AtomicUsize::new(0),
            nonce_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_allowance(&self, owner: Address, value: u128) {
        self.state.lock().allowances.insert(owner, value);
    }

    /// Fail the next sends with these errors, in order
    pub fn fail_sends(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.state.lock().send_errors.extend(errors);
    }

    /// Mine creation calls as reverted
    pub fn revert_creates(&self, revert: bool) {
        self.state.lock().revert_creates = revert;
    }

    #[must_use]
    pub fn allowance_of(&self, owner: &Address) -> u128 {
        self.state.lock().allowances.get(owner).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn allowance_reads(&self) -> usize {
        self.allowance_reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn nonce_reads(&self) -> usize {
        self.nonce_reads.load(Ordering::SeqCst)
    }

    /// Accepted transactions, in acceptance order
    #[must_use]
    pub fn sent(&self) -> Vec<TxRequest> {
        self.state.lock().sent.clone()
    }

    /// Accepted transactions whose call has `label`
    #[must_use]
    pub fn sent_count(&self, label: &str) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|r| r.call.label() == label)
            .count()
    }

    fn tx_hash(request: &TxRequest) -> TxHash {
        let digest = ContentHash::compute(
            format!(
                "{}:{}:{}:{:?}",
                request.from, request.nonce, request.gas_price, request.call
            )
            .as_bytes(),
        );
        TxHash::new(*digest.as_bytes())
    }

    fn execute(state: &mut ChainState, request: &TxRequest, hash: TxHash) -> Receipt {
        state.block += 1;
        let mut receipt = Receipt {
            tx_hash: hash,
            block_number: state.block,
            success: true,
            asset_index: None,
        };
        let allowance = state.allowances.entry(request.from).or_insert(0);
        match &request.call {
            TxCall::Approve { amount } => *allowance = *amount,
            TxCall::IncreaseAllowance { delta } => *allowance = allowance.saturating_add(*delta),
            TxCall::DecreaseAllowance { delta } => *allowance = allowance.saturating_sub(*delta),
            TxCall::CreateAsset { stake, .. } => {
                if state.revert_creates || *allowance < *stake {
                    receipt.success = false;
                } else {
                    *allowance -= *stake;
                    let index = state.next_index;
                    state.next_index += 1;
                    state.handles.insert(AssetHandle::build(&test_network(), index));
                    receipt.asset_index = Some(index);
                }
            }
        }
        receipt
    }
}

#[async_trait]
impl ChainApi for ScriptedChain {
    fn address_of(&self, key: &KeyMaterial) -> Result<Address, ChainError> {
        if key.expose().is_empty() {
            return Err(ChainError::Signing("empty key".to_string()));
        }
        Ok(derive_address(key))
    }

    fn network(&self) -> NetworkInfo {
        test_network()
    }

    async fn allowance(&self, owner: &Address) -> Result<u128, ChainError> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.allowance_of(owner))
    }

    async fn pending_nonce(&self, owner: &Address) -> Result<u64, ChainError> {
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .pending_nonces
            .get(owner)
            .copied()
            .unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, _from: &Address, call: &TxCall) -> Result<u64, ChainError> {
        Ok(match call {
            TxCall::CreateAsset { .. } => 500_000,
            _ => 60_000,
        })
    }

    async fn sign(&self, request: &TxRequest, key: &KeyMaterial) -> Result<SignedTx, ChainError> {
        if derive_address(key) != request.from {
            return Err(ChainError::Signing("key does not match sender".to_string()));
        }
        let hash = Self::tx_hash(request);
        self.state.lock().signed.insert(hash, request.clone());
        Ok(SignedTx {
            hash,
            nonce: request.nonce,
            gas_price: request.gas_price,
            raw: hash.as_bytes().to_vec(),
        })
    }

    async fn send_raw(&self, signed: &SignedTx) -> Result<TxHash, ChainError> {
        let mut state = self.state.lock();
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }
        let request = state
            .signed
            .get(&signed.hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc("unknown transaction".to_string()))?;
        let pending = state.pending_nonces.get(&request.from).copied().unwrap_or(0);
        if request.nonce < pending {
            return Err(ChainError::NonceTooLow);
        }
        state.pending_nonces.insert(request.from, request.nonce + 1);
        let receipt = Self::execute(&mut state, &request, signed.hash);
        state.receipts.insert(signed.hash, receipt);
        state.sent.push(request);
        Ok(signed.hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, ChainError> {
        self.state
            .lock()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("no receipt for {hash}")))
    }

    async fn validate_handle(&self, handle: &AssetHandle) -> Result<bool, ChainError> {
        Ok(self.state.lock().handles.contains(handle))
    }
}

#[derive(Debug)]
struct NodeState {
    bid: Option<String>,
    statuses: VecDeque<OperationStatus>,
    published: Vec<NodePublishRequest>,
    gets: Vec<NodeGetRequest>,
    results: HashMap<OperationId, Value>,
    fail_requests: usize,
}

/// In-memory node
///
/// Suggests a fixed stake, accepts publishes and queries, resolves published
/// assets, and reports scripted operation statuses (COMPLETED once the script
/// runs out).
#[derive(Debug)]
pub struct ScriptedNode {
    state: Mutex<NodeState>,
    bid_calls: AtomicUsize,
    status_fetches: AtomicUsize,
    operations: AtomicUsize,
    recycles: AtomicUsize,
}

impl Default for ScriptedNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedNode {
    /// Default suggested stake
    pub const DEFAULT_BID: u128 = 1_000;

    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState {
                bid: Some(Self::DEFAULT_BID.to_string()),
                statuses: VecDeque::new(),
                published: Vec::new(),
                gets: Vec::new(),
                results: HashMap::new(),
                fail_requests: 0,
            }),
            bid_calls: AtomicUsize::new(0),
            status_fetches: AtomicUsize::new(0),
            operations: AtomicUsize::new(0),
            recycles: AtomicUsize::new(0),
        }
    }

    /// Raw stake suggestion returned from now on
    pub fn set_bid(&self, bid: Option<&str>) {
        self.state.lock().bid = bid.map(str::to_string);
    }

    /// Statuses returned by the next status fetches
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = OperationStatus>) {
        self.state.lock().statuses.extend(statuses);
    }

    /// Fail the next `n` requests of any kind with a transport error
    pub fn fail_requests(&self, n: usize) {
        self.state.lock().fail_requests = n;
    }

    #[must_use]
    pub fn published(&self) -> Vec<NodePublishRequest> {
        self.state.lock().published.clone()
    }

    #[must_use]
    pub fn gets(&self) -> Vec<NodeGetRequest> {
        self.state.lock().gets.clone()
    }

    #[must_use]
    pub fn bid_calls(&self) -> usize {
        self.bid_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status_fetches(&self) -> usize {
        self.status_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn recycles(&self) -> usize {
        self.recycles.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if state.fail_requests > 0 {
            state.fail_requests -= 1;
            return Err(NodeError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn next_operation(&self, kind: &str) -> OperationId {
        let n = self.operations.fetch_add(1, Ordering::SeqCst);
        OperationId::new(format!("{kind}-{n}"))
    }
}

#[async_trait]
impl NodeApi for ScriptedNode {
    async fn info(&self) -> Result<NodeInfo, NodeError> {
        self.check_failure()?;
        Ok(NodeInfo {
            version: "6.5.0".to_string(),
            extra: serde_json::Map::new(),
        })
    }

    async fn bid_suggestion(
        &self,
        _content_id: ContentHash,
        _byte_size: u64,
        _replication_factor: u32,
    ) -> Result<Option<String>, NodeError> {
        self.bid_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.state.lock().bid.clone())
    }

    async fn query(
        &self,
        _query: &str,
        _query_type: QueryType,
        _repository: &str,
    ) -> Result<OperationId, NodeError> {
        self.check_failure()?;
        Ok(self.next_operation("query"))
    }

    async fn publish(&self, request: &NodePublishRequest) -> Result<OperationId, NodeError> {
        self.check_failure()?;
        self.state.lock().published.push(request.clone());
        Ok(self.next_operation("publish"))
    }

    async fn get(&self, request: &NodeGetRequest) -> Result<OperationId, NodeError> {
        self.check_failure()?;
        let id = self.next_operation("get");
        let mut state = self.state.lock();
        let assertion = state
            .published
            .iter()
            .rev()
            .find(|p| p.asset_handle == request.id)
            .map(|p| match request.content_visibility {
                Visibility::Public => Some(p.assertion.clone()),
                Visibility::Private => p.private_assertion.clone(),
            });
        let result = match assertion {
            Some(Some(statements)) => json!({"assertion": statements}),
            _ => json!({"assertion": []}),
        };
        state.results.insert(id.clone(), result);
        state.gets.push(request.clone());
        Ok(id)
    }

    async fn operation_result(
        &self,
        id: &OperationId,
        _kind: &OperationKind,
    ) -> Result<OperationRecord, NodeError> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let mut state = self.state.lock();
        let status = state
            .statuses
            .pop_front()
            .unwrap_or(OperationStatus::Completed);
        let record = OperationRecord::new(status);
        Ok(match status {
            OperationStatus::Completed => match state.results.get(id) {
                Some(result) => record.with_data(result.clone()),
                None => record.with_data(json!({"operationId": id.as_str()})),
            },
            OperationStatus::Failed => record.with_error("scripted failure"),
            _ => record.with_data(Value::Null),
        })
    }
}

impl SessionControl for ScriptedNode {
    fn recycle(&self) -> Result<(), NodeError> {
        self.recycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(from: Address, nonce: u64, stake: u128) -> TxRequest {
        TxRequest {
            from,
            call: TxCall::CreateAsset {
                content_id: ContentHash::compute(b"a"),
                byte_size: 10,
                replication_factor: 1,
                stake,
            },
            nonce,
            gas_price: 1_000,
            gas_limit: 500_000,
        }
    }

    #[tokio::test]
    async fn chain_enforces_nonces_and_spends_allowance() {
        let chain = ScriptedChain::new();
        let key = test_key(1);
        let from = chain.address_of(&key).unwrap();
        chain.set_allowance(from, 150);

        let first = chain.sign(&create(from, 0, 100), &key).await.unwrap();
        chain.send_raw(&first).await.unwrap();
        let receipt = chain.wait_for_receipt(first.hash).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.asset_index, Some(FIRST_ASSET_INDEX));
        assert_eq!(chain.allowance_of(&from), 50);

        let reused = chain.sign(&create(from, 0, 10), &key).await.unwrap();
        assert_eq!(chain.send_raw(&reused).await, Err(ChainError::NonceTooLow));

        let short = chain.sign(&create(from, 1, 100), &key).await.unwrap();
        chain.send_raw(&short).await.unwrap();
        assert!(!chain.wait_for_receipt(short.hash).await.unwrap().success);
    }

    #[tokio::test]
    async fn node_replays_scripted_statuses() {
        let node = ScriptedNode::new();
        node.script_statuses([OperationStatus::Pending]);
        let id = OperationId::new("op");

        let first = node.operation_result(&id, &OperationKind::Query).await.unwrap();
        let second = node.operation_result(&id, &OperationKind::Query).await.unwrap();
        assert_eq!(first.status, OperationStatus::Pending);
        assert_eq!(second.status, OperationStatus::Completed);
        assert_eq!(node.status_fetches(), 2);
    }

    #[test]
    fn identity_matches_chain_derivation() {
        let chain = ScriptedChain::new();
        let identity = test_identity(4);
        assert_eq!(
            identity.address(),
            &chain.address_of(&test_key(4)).unwrap()
        );
    }
}
