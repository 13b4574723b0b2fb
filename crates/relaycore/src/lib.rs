//! Core abstractions for the relay workflow engine
//!
//! This crate provides the graph model, the execution record and its
//! lifecycle, the node executor contract, and the event types that the
//! runtime and node crates build on.

mod error;
pub mod events;
mod execution;
mod graph;
mod node;

pub use error::{
    CycleError, EngineError, GraphError, NodeError, RegistryError, StoreError, TransitionError,
};
pub use events::{EventBus, EventEmitter, ExecutionEvent, NodeEvent};
pub use execution::{
    Execution, ExecutionId, ExecutionMode, ExecutionStatus, NodeResult, NodeResults,
    MAX_ERROR_LEN,
};
pub use graph::{
    validate, validate_handle, BuiltinCatalog, DataMap, Edge, Node, NodeCatalog, NodeCategory,
    NodeId, NodeType, Position, WorkflowDefinition, WorkflowGraph, WorkflowId,
    BUILTIN_NODE_TYPES, DEFAULT_HANDLE,
};
pub use node::{ExecutionContext, ExecutionResult, NodeExecutor, ResultMetadata};
