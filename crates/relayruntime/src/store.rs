//! Storage seams for workflow graphs and execution records.

use async_trait::async_trait;
use relaycore::{
    Execution, ExecutionId, StoreError, WorkflowDefinition, WorkflowGraph, WorkflowId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Source of workflow graphs.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Snapshot of the workflow's graph. The caller owns the copy.
    async fn get_graph(&self, workflow_id: &str) -> Result<WorkflowGraph, StoreError>;
}

/// Persistence for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Replace the stored record with `execution`.
    async fn update(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    graphs: RwLock<HashMap<WorkflowId, WorkflowGraph>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, workflow_id: impl Into<WorkflowId>, graph: WorkflowGraph) {
        self.graphs.write().await.insert(workflow_id.into(), graph);
    }

    pub async fn put_definition(&self, definition: WorkflowDefinition) {
        self.put(definition.id, definition.graph).await;
    }

    pub async fn remove(&self, workflow_id: &str) -> Option<WorkflowGraph> {
        self.graphs.write().await.remove(workflow_id)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_graph(&self, workflow_id: &str) -> Result<WorkflowGraph, StoreError> {
        self.graphs
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Workflow",
                id: workflow_id.to_string(),
            })
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All executions of a workflow, oldest first.
    pub async fn find_by_workflow(&self, workflow_id: &str) -> Vec<Execution> {
        let mut found: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id() == workflow_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.created_at());
        found
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id()) {
            return Err(StoreError::AlreadyExists {
                kind: "Execution",
                id: execution.id().to_string(),
            });
        }
        executions.insert(execution.id(), execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id()) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "Execution",
                id: execution.id().to_string(),
            }),
        }
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }
}
