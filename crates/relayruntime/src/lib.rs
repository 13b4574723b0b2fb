//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the executor
//! registry, execution ordering, the orchestrator that walks a graph node by
//! node, storage seams, and the job queue that feeds runs to it.

mod orchestrator;
mod queue;
mod registry;
mod runtime;
mod store;
pub mod topology;

pub use orchestrator::{Orchestrator, RunControl, NODE_TIMEOUT_KEY};
pub use queue::{Job, JobQueue};
pub use registry::{ExecutorFactory, ExecutorMetadata, ExecutorRegistry, PortDefinition};
pub use runtime::{Runtime, RuntimeConfig, TriggerInput, ENV_PREFIX};
pub use store::{ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore, WorkflowStore};
pub use topology::sort;
