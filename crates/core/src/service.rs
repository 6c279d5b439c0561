use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::{ExecutionId, ResultRow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Request(String),
    #[error("datasource `{0}` is not available")]
    UnknownDatasource(String),
    #[error("execution `{0}` is unknown")]
    UnknownExecution(ExecutionId),
    #[error("execution `{0}` has no results yet")]
    ResultsUnavailable(ExecutionId),
    #[error("invalid page token `{0}`")]
    InvalidPageToken(String),
}

impl ServiceError {
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub datasource_id: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub execution_id: ExecutionId,
    pub status: String,
    pub query_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub status: String,
    pub message: Option<String>,
    pub query_hash: Option<String>,
    pub error_summary: Option<String>,
    pub row_limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub execution_id: ExecutionId,
    /// `None` asks for the first page.
    pub page_token: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub next_page_token: Option<String>,
    pub row_limit_reached: bool,
}

/// Remote query execution service. Implementations own the transport.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, ServiceError>;

    async fn status(&self, execution_id: &ExecutionId) -> Result<StatusReport, ServiceError>;

    async fn page(&self, request: PageRequest) -> Result<ResultPage, ServiceError>;

    async fn cancel(&self, execution_id: &ExecutionId) -> Result<(), ServiceError>;
}

/// Status event published on the shared push connection for every execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub execution_id: ExecutionId,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl PushEvent {
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("push connection failed: {0}")]
    Connect(String),
    #[error("push stream failed: {0}")]
    Stream(String),
}

pub type PushStream = BoxStream<'static, Result<String, PushError>>;

/// Source of the single multiplexed push connection. Each subscription yields
/// raw payloads; decoding and routing happen in the multiplexer.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn subscribe(&self) -> Result<PushStream, PushError>;
}

#[cfg(test)]
mod tests {
    use super::PushEvent;
    use crate::execution::ExecutionId;

    #[test]
    fn push_event_uses_camel_case_wire_names() {
        let event = PushEvent::decode(r#"{"executionId":"e-1","status":"RUNNING"}"#)
            .expect("payload should decode");
        assert_eq!(event.execution_id, ExecutionId::new("e-1"));
        assert_eq!(event.status, "RUNNING");
        assert!(event.message.is_none());

        let encoded = event.encode().expect("event should encode");
        assert!(encoded.contains("\"executionId\":\"e-1\""));
    }

    #[test]
    fn push_event_rejects_payload_without_execution_id() {
        assert!(PushEvent::decode(r#"{"status":"RUNNING"}"#).is_err());
        assert!(PushEvent::decode("not json").is_err());
    }
}
