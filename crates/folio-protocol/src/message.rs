use std::fmt;

use folio_git::CommitInfo;
use folio_store::ObjectsData;
use folio_sync::Progress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::payload::{
    CloneRequest, ConfirmData, ErrorData, LookupCommitsRequest, RetryPushRequest, SyncRequest,
};

pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Matches responses to the request that caused them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every operation on the wire. The first five flow from the caller to the
/// engine, the rest back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "payload", rename_all = "camelCase")]
pub enum Operation {
    Clone(CloneRequest),
    RefreshObjects,
    Sync(SyncRequest),
    RetryPush(RetryPushRequest),
    LookupCommits(LookupCommitsRequest),
    Progress(Progress),
    Objects(ObjectsData),
    Commits(Vec<CommitInfo>),
    Error(ErrorData),
    Confirm(ConfirmData),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clone(_) => "clone",
            Self::RefreshObjects => "refreshObjects",
            Self::Sync(_) => "sync",
            Self::RetryPush(_) => "retryPush",
            Self::LookupCommits(_) => "lookupCommits",
            Self::Progress(_) => "progress",
            Self::Objects(_) => "objects",
            Self::Commits(_) => "commits",
            Self::Error(_) => "error",
            Self::Confirm(_) => "confirm",
        }
    }

    /// Returns `true` for caller-to-engine operations.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Clone(_)
                | Self::RefreshObjects
                | Self::Sync(_)
                | Self::RetryPush(_)
                | Self::LookupCommits(_)
        )
    }

    /// Returns `true` for the responses that complete a request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirm(_) | Self::Commits(_) | Self::Error(_))
    }
}

/// `{ correlationId, operation, payload }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub struct WorkerMessage {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
}

impl WorkerMessage {
    pub fn new(correlation_id: CorrelationId, operation: Operation) -> Self {
        Self {
            correlation_id,
            operation,
        }
    }

    pub fn reply(&self, operation: Operation) -> Self {
        Self::new(self.correlation_id.clone(), operation)
    }
}

/// Flat wire form: the operation tag and payload sit beside the id.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    correlation_id: CorrelationId,
    operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl TryFrom<RawMessage> for WorkerMessage {
    type Error = serde_json::Error;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let mut tagged = Map::new();
        tagged.insert("operation".into(), Value::String(raw.operation));
        if let Some(payload) = raw.payload {
            tagged.insert("payload".into(), payload);
        }
        Ok(Self {
            correlation_id: raw.correlation_id,
            operation: serde_json::from_value(Value::Object(tagged))?,
        })
    }
}

impl From<WorkerMessage> for RawMessage {
    fn from(message: WorkerMessage) -> Self {
        let name = message.operation.name().to_string();
        let payload = match serde_json::to_value(&message.operation) {
            Ok(Value::Object(mut tagged)) => tagged.remove("payload"),
            _ => None,
        };
        Self {
            correlation_id: message.correlation_id,
            operation: name,
            payload,
        }
    }
}
