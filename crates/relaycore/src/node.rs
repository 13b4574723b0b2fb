use crate::{events::EventEmitter, DataMap, ExecutionId, NodeError, NodeId, NodeType, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Core trait that every node type's executor implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run the node.
    ///
    /// Expected failures (a refused connection, a bad response) are returned
    /// as `Ok(ExecutionResult::failure(..))`. `Err` is reserved for defects;
    /// the orchestrator records it exactly like a failed result.
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError>;

    /// Optional: check the node configuration before `execute` runs.
    async fn validate(&self, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Everything a node sees while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_type: NodeType,

    /// Read-only copy of the node's stored configuration.
    pub config: DataMap,

    /// Merged output of the node's direct predecessors, or the trigger
    /// payload for nodes without predecessors.
    pub previous_data: DataMap,

    /// Environment and secrets injected by the runtime.
    pub environment: HashMap<String, String>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Signalled when the execution is cancelled.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&serde_json::Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::MissingConfig(name.to_string()))
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(|v| v.as_str())
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Outcome reported by a node executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl ExecutionResult {
    pub fn ok(data: DataMap) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.metadata.node_type = Some(node_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.extra.insert(key.into(), value.into());
        self
    }
}

impl From<NodeError> for ExecutionResult {
    fn from(err: NodeError) -> Self {
        ExecutionResult::failure(err.to_string())
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "DataMap::is_empty")]
    pub extra: DataMap,
}
