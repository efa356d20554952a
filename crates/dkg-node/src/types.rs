//! Node wire types
//!
//! Operation ids, kinds and statuses, plus the request/response bodies the
//! node's JSON API exchanges.

use dkg_assertion::{Assertion, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Opaque id of an asynchronous node-side operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which operation family an id belongs to; also its result route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Publish,
    Get,
    Custom(String),
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Query => "query",
            Self::Publish => "publish",
            Self::Get => "get",
            Self::Custom(tag) => tag,
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OperationKind {
    fn from(tag: &str) -> Self {
        match tag {
            "query" => Self::Query,
            "publish" => Self::Publish,
            "get" => Self::Get,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Operation status as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    /// COMPLETED or FAILED
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// One fetched snapshot of an operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub status: OperationStatus,
    /// Result payload; `Null` until completed
    pub data: Value,
    /// Node-reported reason, for failed operations
    pub error_message: Option<String>,
}

impl OperationRecord {
    /// Record with no payload
    #[must_use]
    pub fn new(status: OperationStatus) -> Self {
        Self {
            status,
            data: Value::Null,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// `GET /{kind}/{id}` response body
#[derive(Debug, Deserialize)]
pub(crate) struct OperationResponse {
    status: String,
    #[serde(default)]
    data: Value,
}

impl OperationResponse {
    /// Decode into a record; unknown statuses are an error
    pub(crate) fn into_record(self) -> Result<OperationRecord, String> {
        let status: OperationStatus = self.status.parse()?;
        let error_message = self
            .data
            .get("errorMessage")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(OperationRecord {
            status,
            data: self.data,
            error_message,
        })
    }
}

/// Body returned when an operation is started
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationStarted {
    pub(crate) operation_id: OperationId,
}

/// `GET /info` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    /// Any further fields the node reports
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// SPARQL query form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Construct,
    Ask,
    Describe,
}

impl QueryType {
    /// Detect the query form from its text
    ///
    /// Skips comments and `PREFIX`/`BASE` declarations, then reads the first
    /// keyword.
    #[must_use]
    pub fn detect(query: &str) -> Option<Self> {
        let mut tokens = query
            .lines()
            .map(|line| line.split('#').next().unwrap_or(""))
            .flat_map(str::split_whitespace);
        while let Some(token) = tokens.next() {
            match token.to_ascii_uppercase().as_str() {
                "PREFIX" => {
                    tokens.next();
                    tokens.next();
                }
                "BASE" => {
                    tokens.next();
                }
                "SELECT" => return Some(Self::Select),
                "CONSTRUCT" => return Some(Self::Construct),
                "ASK" => return Some(Self::Ask),
                "DESCRIBE" => return Some(Self::Describe),
                _ => return None,
            }
        }
        None
    }
}

/// `POST /query` request body
#[derive(Debug, Clone, Serialize)]
pub(crate) struct QueryRequest<'a> {
    pub(crate) query: &'a str,
    #[serde(rename = "type")]
    pub(crate) query_type: QueryType,
    pub(crate) repository: &'a str,
}

/// Which parts of an asset's content are exchanged with the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Public statements only
    #[default]
    Public,
    /// Public statements plus the private sub-graph
    Private,
}

/// Asset state to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetState {
    /// Newest state, finalized or not
    Latest,
    /// Newest state confirmed on chain
    #[default]
    LatestFinalized,
}

/// `POST /get` request body: resolve a created asset's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGetRequest {
    pub id: String,
    pub state: AssetState,
    pub content_visibility: Visibility,
}

impl NodeGetRequest {
    /// Public content in its latest finalized state
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            id: handle.into(),
            state: AssetState::default(),
            content_visibility: Visibility::default(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: AssetState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.content_visibility = visibility;
        self
    }
}

/// `POST /publish` request body: hand a created asset's statements to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePublishRequest {
    pub asset_handle: String,
    pub assertion_id: ContentHash,
    pub assertion: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_assertion_id: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_assertion: Option<Vec<String>>,
    pub replication_factor: u32,
}

impl NodePublishRequest {
    /// Public statements only
    #[must_use]
    pub fn public(handle: impl Into<String>, assertion: &Assertion, replication_factor: u32) -> Self {
        Self {
            asset_handle: handle.into(),
            assertion_id: assertion.content_id(),
            assertion: assertion.public().statements().to_vec(),
            private_assertion_id: None,
            private_assertion: None,
            replication_factor,
        }
    }

    /// Public and, when present, private statements
    #[must_use]
    pub fn with_private(mut self, assertion: &Assertion) -> Self {
        if let Some(private) = assertion.private() {
            self.private_assertion_id = Some(private.root());
            self.private_assertion = Some(private.statements().to_vec());
        }
        self
    }
}
