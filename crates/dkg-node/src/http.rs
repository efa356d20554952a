//! HTTP node client
//!
//! [`NodeApi`] over the node's JSON API with `reqwest`. One shared client
//! (connection pool) serves all workers, and [`SessionControl::recycle`]
//! swaps in a freshly built client.
//!
//! Reads, queries and `/get` retry transport failures and 500/502/503/504
//! responses with exponential backoff. `POST /publish` is sent exactly once:
//! a lost response may still have reached the node, and the caller decides
//! whether to hand the asset over again.

use crate::api::{NodeApi, SessionControl};
use crate::error::NodeError;
use crate::retry::RetryPolicy;
use crate::types::{
    NodeGetRequest, NodeInfo, NodePublishRequest, OperationId, OperationKind, OperationRecord,
    OperationResponse, OperationStarted, QueryRequest, QueryType,
};
use async_trait::async_trait;
use dkg_assertion::ContentHash;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node endpoint and session policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base URL, e.g. `http://localhost:8900`
    pub endpoint: String,
    /// Idle connections kept per host
    pub pool_size: usize,
    /// Retries for transport errors and 5xx responses
    pub http_retries: u32,
    /// Backoff base; doubles per retry
    pub http_backoff_ms: u64,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8900".to_string(),
            pool_size: 5,
            http_retries: 5,
            http_backoff_ms: 2000,
            request_timeout_ms: 30_000,
        }
    }
}

impl NodeConfig {
    /// Endpoint from a host name and port
    #[must_use]
    pub fn for_host(hostname: &str, port: u16) -> Self {
        Self {
            endpoint: format!("http://{hostname}:{port}"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub fn with_http_retries(mut self, retries: u32) -> Self {
        self.http_retries = retries;
        self
    }

    #[must_use]
    pub fn with_http_backoff_ms(mut self, ms: u64) -> Self {
        self.http_backoff_ms = ms;
        self
    }

    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Transport retry schedule
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.http_retries,
            Duration::from_millis(self.http_backoff_ms),
            2.0,
        )
    }

    fn build_client(&self) -> Result<Client, NodeError> {
        Client::builder()
            .timeout(Duration::from_millis(self.request_timeout_ms))
            .pool_max_idle_per_host(self.pool_size)
            .build()
            .map_err(|e| NodeError::Client(e.to_string()))
    }
}

/// `GET /bid-suggestion` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BidSuggestionResponse {
    #[serde(default)]
    bid_suggestion: Option<Value>,
}

/// Node client over HTTP
#[derive(Debug)]
pub struct HttpNodeClient {
    config: NodeConfig,
    retry: RetryPolicy,
    client: RwLock<Client>,
}

impl HttpNodeClient {
    /// Build a client for `config.endpoint`
    ///
    /// # Errors
    /// Returns [`NodeError::Client`] when the HTTP client cannot be built
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let client = config.build_client()?;
        Ok(Self {
            retry: config.retry_policy(),
            config,
            client: RwLock::new(client),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Send the request built by `build`, retrying transient failures
    async fn send<F>(&self, build: F) -> Result<Response, NodeError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry
            .run(NodeError::is_transient, |attempt| {
                let request = build(&self.client.read());
                Self::execute(request, attempt)
            })
            .await
    }

    async fn execute(request: RequestBuilder, attempt: u32) -> Result<Response, NodeError> {
        let response = request.send().await.map_err(|e| {
            warn!(attempt, error = %e, "node request failed");
            NodeError::transport(&e)
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(attempt, status = status.as_u16(), "node returned error status");
        Err(NodeError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, NodeError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.send(|client| client.get(&url).query(query)).await?;
        response.json().await.map_err(NodeError::decode)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NodeError> {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self.send(|client| client.post(&url).json(body)).await?;
        response.json().await.map_err(NodeError::decode)
    }

    /// POST without retries
    async fn post_json_once<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NodeError> {
        let url = self.url(path);
        debug!(%url, "POST once");
        let request = self.client.read().post(&url).json(body);
        let response = Self::execute(request, 0).await?;
        response.json().await.map_err(NodeError::decode)
    }
}

#[async_trait]
impl NodeApi for HttpNodeClient {
    async fn info(&self) -> Result<NodeInfo, NodeError> {
        self.get_json("info", &[]).await
    }

    async fn bid_suggestion(
        &self,
        content_id: ContentHash,
        byte_size: u64,
        replication_factor: u32,
    ) -> Result<Option<String>, NodeError> {
        let response: BidSuggestionResponse = self
            .get_json(
                "bid-suggestion",
                &[
                    ("contentId", content_id.to_string()),
                    ("size", byte_size.to_string()),
                    ("replicationFactor", replication_factor.to_string()),
                ],
            )
            .await?;
        Ok(match response.bid_suggestion {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    async fn query(
        &self,
        query: &str,
        query_type: QueryType,
        repository: &str,
    ) -> Result<OperationId, NodeError> {
        let started: OperationStarted = self
            .post_json(
                "query",
                &QueryRequest {
                    query,
                    query_type,
                    repository,
                },
            )
            .await?;
        Ok(started.operation_id)
    }

    async fn publish(&self, request: &NodePublishRequest) -> Result<OperationId, NodeError> {
        let started: OperationStarted = self.post_json_once("publish", request).await?;
        Ok(started.operation_id)
    }

    async fn get(&self, request: &NodeGetRequest) -> Result<OperationId, NodeError> {
        let started: OperationStarted = self.post_json("get", request).await?;
        Ok(started.operation_id)
    }

    async fn operation_result(
        &self,
        id: &OperationId,
        kind: &OperationKind,
    ) -> Result<OperationRecord, NodeError> {
        let response: OperationResponse = self
            .get_json(&format!("{}/{}", kind.as_str(), id.as_str()), &[])
            .await?;
        response.into_record().map_err(NodeError::Decode)
    }
}

impl SessionControl for HttpNodeClient {
    fn recycle(&self) -> Result<(), NodeError> {
        let fresh = self.config.build_client()?;
        *self.client.write() = fresh;
        metrics::counter!("dkg_node_session_recycles_total").increment(1);
        info!(endpoint = %self.config.endpoint, "node session recycled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationStatus;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn client(server: &MockServer) -> HttpNodeClient {
        HttpNodeClient::new(
            NodeConfig::default()
                .with_endpoint(server.base_url())
                .with_http_retries(2)
                .with_http_backoff_ms(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn info_is_fetched() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(200)
                    .json_body(json!({"version": "6.5.0", "peerId": "Qm"}));
            })
            .await;

        let info = client(&server).info().await.unwrap();
        assert_eq!(info.version, "6.5.0");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bid_suggestion_sends_parameters() {
        let server = MockServer::start_async().await;
        let id = ContentHash::compute(b"asset");
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/bid-suggestion")
                    .query_param("contentId", id.to_string())
                    .query_param("size", "128")
                    .query_param("replicationFactor", "3");
                then.status(200)
                    .json_body(json!({"bidSuggestion": "1000000000000000000"}));
            })
            .await;

        let bid = client(&server).bid_suggestion(id, 128, 3).await.unwrap();
        assert_eq!(bid.as_deref(), Some("1000000000000000000"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn query_posts_type_and_repository() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/query").json_body(json!({
                    "query": "SELECT ?s WHERE { ?s ?p ?o }",
                    "type": "SELECT",
                    "repository": "privateCurrent"
                }));
                then.status(202).json_body(json!({"operationId": "q-42"}));
            })
            .await;

        let id = client(&server)
            .query(
                "SELECT ?s WHERE { ?s ?p ?o }",
                QueryType::Select,
                "privateCurrent",
            )
            .await
            .unwrap();
        assert_eq!(id, OperationId::new("q-42"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn operation_result_uses_kind_route() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/publish/op-7");
                then.status(200)
                    .json_body(json!({"status": "COMPLETED", "data": {"ok": true}}));
            })
            .await;

        let record = client(&server)
            .operation_result(&OperationId::new("op-7"), &OperationKind::Publish)
            .await
            .unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn unknown_status_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/query/op-1");
                then.status(200).json_body(json!({"status": "DONE"}));
            })
            .await;

        let err = client(&server)
            .operation_result(&OperationId::new("op-1"), &OperationKind::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Decode(_)));
    }

    #[tokio::test]
    async fn service_unavailable_is_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(503).body("busy");
            })
            .await;

        let err = client(&server).info().await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Status {
                status: 503,
                body: "busy".to_string()
            }
        );
        assert_eq!(mock.hits_async().await, 3);
    }

    #[tokio::test]
    async fn get_posts_handle_state_and_visibility() {
        let server = MockServer::start_async().await;
        let handle = "did:dkg:base:84532/0xb8/54085";
        let public = server
            .mock_async(|when, then| {
                when.method(POST).path("/get").json_body(json!({
                    "id": handle,
                    "state": "LATEST_FINALIZED",
                    "contentVisibility": "public"
                }));
                then.status(202).json_body(json!({"operationId": "g-1"}));
            })
            .await;
        let private = server
            .mock_async(|when, then| {
                when.method(POST).path("/get").json_body(json!({
                    "id": handle,
                    "state": "LATEST",
                    "contentVisibility": "private"
                }));
                then.status(202).json_body(json!({"operationId": "g-2"}));
            })
            .await;

        let client = client(&server);
        let first = client.get(&NodeGetRequest::new(handle)).await.unwrap();
        let second = client
            .get(
                &NodeGetRequest::new(handle)
                    .with_state(crate::types::AssetState::Latest)
                    .with_visibility(crate::types::Visibility::Private),
            )
            .await
            .unwrap();

        assert_eq!(first, OperationId::new("g-1"));
        assert_eq!(second, OperationId::new("g-2"));
        public.assert_async().await;
        private.assert_async().await;
    }

    #[tokio::test]
    async fn publish_is_never_resent() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/publish");
                then.status(503).body("busy");
            })
            .await;
        let assertion = dkg_assertion::format_graph(&dkg_assertion::GraphPayload::public(json!({
            "@context": "http://schema.org",
            "@id": "urn:asset:1",
            "name": "asset"
        })))
        .unwrap();

        let err = client(&server)
            .publish(&NodePublishRequest::public("did:dkg:base:84532/0xb8/1", &assertion, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::Status { status: 503, .. }));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn client_errors_surface_immediately() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(404);
            })
            .await;

        let err = client(&server).info().await.unwrap_err();
        assert!(matches!(err, NodeError::Status { status: 404, .. }));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn recycle_keeps_client_usable() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(200).json_body(json!({"version": "6"}));
            })
            .await;

        let client = client(&server);
        client.info().await.unwrap();
        client.recycle().unwrap();
        client.info().await.unwrap();
        assert_eq!(mock.hits_async().await, 2);
    }
}
