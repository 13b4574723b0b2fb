use crate::{ExecutionStatus, NodeId};
use thiserror::Error;

/// Top-level error for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid execution: {0}")]
    InvalidExecution(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job queue closed")]
    QueueClosed,
}

/// Structural problems in a workflow graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Edge {source_id} -> {target} references missing node {missing}")]
    DanglingEdge {
        source_id: NodeId,
        target: NodeId,
        missing: NodeId,
    },

    #[error("Edge on node {0} connects the node to itself")]
    SelfLoop(NodeId),

    #[error("A connection {source_id}.{source_handle} -> {target}.{target_handle} already exists")]
    DuplicateEdge {
        source_id: NodeId,
        source_handle: String,
        target: NodeId,
        target_handle: String,
    },

    #[error("Unknown node type '{node_type}' on node {node_id}")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    #[error("Invalid handle '{handle}': {reason}")]
    InvalidHandle { handle: String, reason: String },

    #[error("Invalid position on node {node_id}: {reason}")]
    InvalidPosition { node_id: NodeId, reason: String },

    #[error("Invalid name on node {node_id}: {reason}")]
    InvalidName { node_id: NodeId, reason: String },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {source_id} -> {target}")]
    EdgeNotFound { source_id: NodeId, target: NodeId },

    #[error("Cannot execute workflow with no nodes")]
    Empty,
}

/// The sorter found a dependency cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Workflow graph contains a cycle at node {node_id} ({})", .cycle.join(" -> "))]
pub struct CycleError {
    /// The node that was reached again while still on the recursion stack.
    pub node_id: NodeId,
    /// The nodes of the cycle in edge direction, starting and ending at `node_id`.
    pub cycle: Vec<NodeId>,
}

/// An execution lifecycle method was called from a state that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot {action} execution in state {from}: {reason}")]
pub struct TransitionError {
    pub action: &'static str,
    pub from: ExecutionStatus,
    pub reason: &'static str,
}

/// Unexpected failures raised by a node executor.
///
/// Expected failures are reported as `ExecutionResult { success: false, .. }`;
/// the orchestrator converts these into the same shape.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node execution timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Returned by executors that stop early on their cancellation token.
    #[error("Node execution was cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No executor found for node type: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
