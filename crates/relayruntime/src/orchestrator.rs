//! Drives one execution from PENDING to a terminal state.

use crate::{topology, ExecutionStore, ExecutorRegistry, RuntimeConfig, WorkflowStore};
use chrono::Utc;
use relaycore::{
    DataMap, EngineError, EventBus, Execution, ExecutionContext, ExecutionEvent, ExecutionResult,
    ExecutionStatus, GraphError, Node, NodeError, NodeId, NodeResult, NodeResults,
    TransitionError, WorkflowGraph,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Node config key that overrides the runtime's default node timeout.
pub const NODE_TIMEOUT_KEY: &str = "timeout_ms";

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ExecutorRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    event_bus: Arc<EventBus>,
    config: Arc<RuntimeConfig>,
}

/// Cancellation handle shared by a run and whoever may cancel it.
///
/// A run settles on its outcome exactly once, just before the terminal
/// transition. A cancel request and settling exclude each other: once the run
/// has settled, [`RunControl::cancel`] is refused, and a request that got in
/// first turns whatever outcome the run reached into CANCELLED.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

const RUNNING: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const SETTLED: u8 = 2;

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal observed by the walk and, through child tokens, by executors.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation. Returns `false` once the run has settled.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, CANCEL_REQUESTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) | Err(CANCEL_REQUESTED) => {
                self.token.cancel();
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fix the outcome. `false` means cancellation won.
    fn settle(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, SETTLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            && !self.token.is_cancelled()
    }
}

/// Where a run ended up before its terminal transition.
enum Outcome {
    Completed,
    Failed {
        error: String,
        detail: Option<String>,
        node_results: Option<NodeResults>,
    },
    Cancelled,
}

impl Outcome {
    fn failed(error: String, detail: Option<String>, node_results: Option<NodeResults>) -> Self {
        Self::Failed {
            error,
            detail,
            node_results,
        }
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        event_bus: Arc<EventBus>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            registry,
            workflows,
            executions,
            event_bus,
            config,
        }
    }

    /// Run a PENDING execution to completion and persist the terminal record.
    ///
    /// Node failures end up on the returned record, never as `Err`. `Err` means
    /// the execution was not PENDING or its final state could not be stored.
    #[instrument(
        skip(self, execution, control),
        fields(execution_id = %execution.id(), workflow_id = %execution.workflow_id())
    )]
    pub async fn run(
        &self,
        mut execution: Execution,
        control: RunControl,
    ) -> Result<Execution, EngineError> {
        if execution.status() != ExecutionStatus::Pending {
            warn!(status = %execution.status(), "Rejecting delivery of an execution that is not pending");
            return Err(TransitionError {
                action: "start",
                from: execution.status(),
                reason: "only pending executions can be started",
            }
            .into());
        }

        let mut outcome = self.drive(&mut execution, control.token()).await?;
        if !control.settle() {
            outcome = Outcome::Cancelled;
        }

        match outcome {
            Outcome::Completed => {
                let results = execution.node_results().clone();
                execution.complete(results)?;
            }
            Outcome::Failed {
                error,
                detail,
                node_results,
            } => execution.fail(error, detail, node_results)?,
            Outcome::Cancelled => {
                info!("Execution cancelled");
                execution.cancel()?;
            }
        }

        self.finish(execution).await
    }

    async fn drive(
        &self,
        execution: &mut Execution,
        cancel: &CancellationToken,
    ) -> Result<Outcome, TransitionError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let graph = match self.workflows.get_graph(execution.workflow_id()).await {
            Ok(graph) => graph,
            Err(err) => {
                warn!(error = %err, "Workflow graph unavailable");
                return Ok(Outcome::failed(err.to_string(), None, None));
            }
        };

        if graph.is_empty() {
            return Ok(Outcome::failed(GraphError::Empty.to_string(), None, None));
        }

        if let Err(err) = graph.validate(self.registry.as_ref()) {
            warn!(error = %err, "Workflow graph failed validation");
            return Ok(Outcome::failed(err.to_string(), Some(format!("{:?}", err)), None));
        }

        let order = match topology::sort(&graph) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "Workflow graph contains a cycle");
                let detail = format!("cycle: {}", err.cycle.join(" -> "));
                return Ok(Outcome::failed(err.to_string(), Some(detail), Some(Default::default())));
            }
        };

        execution.start()?;
        if let Err(err) = self.executions.update(execution).await {
            // The terminal write is retried; losing the RUNNING marker is survivable.
            warn!(error = %err, "Failed to persist running state");
        }

        info!(nodes = order.len(), "Execution started");
        self.event_bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution.id(),
            workflow_id: execution.workflow_id().to_string(),
            node_count: order.len(),
            timestamp: Utc::now(),
        });

        self.walk(execution, &graph, &order, cancel).await
    }

    async fn walk(
        &self,
        execution: &mut Execution,
        graph: &WorkflowGraph,
        order: &[NodeId],
        cancel: &CancellationToken,
    ) -> Result<Outcome, TransitionError> {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let mut outputs: HashMap<&str, DataMap> = HashMap::new();

        for node_id in order {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let Some(node) = graph.node(node_id) else {
                continue;
            };

            let input = gather_input(graph, node_id, &position, &outputs, execution.trigger_data());
            let Some(result) = self.run_node(execution, node, input, cancel).await else {
                return Ok(Outcome::Cancelled);
            };
            if cancel.is_cancelled() {
                debug!(node_id = %node_id, "Discarding result of node finished after cancellation");
                return Ok(Outcome::Cancelled);
            }

            execution.record_node_result(node_id.clone(), result.clone())?;
            if !result.success {
                let error = result.error.unwrap_or_else(|| "Node failed".to_string());
                warn!(node_id = %node_id, error = %error, "Execution failed");
                return Ok(Outcome::failed(error, Some(format!("node {} failed", node_id)), None));
            }
            outputs.insert(node_id.as_str(), result.data.unwrap_or_default());
        }

        Ok(Outcome::Completed)
    }

    /// Resolve, validate and execute one node. `None` means the run was
    /// cancelled while the node was in flight. Cancellation does not abort the
    /// executor; it sees the signal on its context token.
    async fn run_node(
        &self,
        execution: &Execution,
        node: &Node,
        input: DataMap,
        cancel: &CancellationToken,
    ) -> Option<NodeResult> {
        let started = Instant::now();
        let node_type = node.node_type.clone();

        self.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: execution.id(),
            node_id: node.id.clone(),
            node_type: node_type.to_string(),
            timestamp: Utc::now(),
        });
        debug!(node_id = %node.id, node_type = %node_type, "Running node");

        let executor = match self.registry.get(node_type.as_str()) {
            Ok(executor) => executor,
            Err(err) => return Some(self.node_failed(execution, node, err.to_string(), started)),
        };

        let ctx = ExecutionContext {
            workflow_id: execution.workflow_id().to_string(),
            execution_id: execution.id(),
            node_id: node.id.clone(),
            node_type: node_type.clone(),
            config: node.data.clone(),
            previous_data: input,
            environment: self.config.environment.clone(),
            events: self.event_bus.create_emitter(execution.id(), node.id.clone()),
            cancellation: cancel.child_token(),
        };

        let timeout_ms = match node_timeout(node, self.config.node_timeout_ms) {
            Ok(millis) => millis,
            Err(err) => return Some(self.node_failed(execution, node, err.to_string(), started)),
        };

        // Own task per node so a panic stays inside it.
        let handle = tokio::spawn(async move {
            if !executor.validate(&ctx).await {
                return Ok(ExecutionResult::failure(format!(
                    "Node validation failed for {} ({})",
                    ctx.node_id, ctx.node_type
                )));
            }
            executor.execute(ctx).await
        });
        let abort = handle.abort_handle();

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), handle) => outcome,
            // The task is left to finish on its own; its result is dropped.
            _ = cancel.cancelled() => return None,
        };

        let result = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(err))) => ExecutionResult::from(err),
            Ok(Err(join_err)) => ExecutionResult::failure(describe_join_error(join_err)),
            Err(_) => {
                abort.abort();
                ExecutionResult::from(NodeError::Timeout { millis: timeout_ms })
            }
        };

        if !result.success {
            let error = result.error.unwrap_or_else(|| "Node failed".to_string());
            return Some(self.node_failed(execution, node, error, started));
        }

        let execution_time_ms = elapsed_ms(started);
        debug!(node_id = %node.id, execution_time_ms, "Node completed");
        self.event_bus.emit(ExecutionEvent::NodeCompleted {
            execution_id: execution.id(),
            node_id: node.id.clone(),
            execution_time_ms,
            timestamp: Utc::now(),
        });

        Some(NodeResult {
            success: true,
            data: Some(result.data.unwrap_or_default()),
            error: None,
            execution_time_ms,
        })
    }

    fn node_failed(
        &self,
        execution: &Execution,
        node: &Node,
        error: String,
        started: Instant,
    ) -> NodeResult {
        warn!(node_id = %node.id, node_type = %node.node_type, error = %error, "Node failed");
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: execution.id(),
            node_id: node.id.clone(),
            error: error.clone(),
            timestamp: Utc::now(),
        });

        NodeResult {
            success: false,
            data: None,
            error: Some(error),
            execution_time_ms: elapsed_ms(started),
        }
    }

    /// Announce and persist the terminal record.
    async fn finish(&self, execution: Execution) -> Result<Execution, EngineError> {
        info!(
            status = %execution.status(),
            duration = %execution.formatted_duration(),
            "Execution finished"
        );
        self.event_bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id: execution.id(),
            status: execution.status(),
            duration_ms: execution.duration_ms().unwrap_or(0),
            error: execution.error().map(str::to_string),
            timestamp: Utc::now(),
        });

        let attempts = self.config.persist_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.executions.update(&execution).await {
                Ok(()) => return Ok(execution),
                Err(err) if attempt < attempts => {
                    warn!(attempt, error = %err, "Failed to persist execution, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        attempts,
                        status = %execution.status(),
                        error = %err,
                        "Giving up persisting final execution state"
                    );
                    return Err(err.into());
                }
            }
        }
    }
}

/// Merged outputs of the node's direct predecessors, in sort order; a later
/// predecessor overwrites an earlier one on key conflicts. Nodes without
/// predecessors receive the trigger data.
fn gather_input(
    graph: &WorkflowGraph,
    node_id: &str,
    position: &HashMap<&str, usize>,
    outputs: &HashMap<&str, DataMap>,
    trigger_data: &DataMap,
) -> DataMap {
    let mut predecessors = graph.predecessors(node_id);
    if predecessors.is_empty() {
        return trigger_data.clone();
    }
    predecessors.sort_by_key(|id| position.get(id.as_str()).copied().unwrap_or(usize::MAX));

    let mut merged = DataMap::new();
    for id in predecessors {
        if let Some(output) = outputs.get(id.as_str()) {
            for (key, value) in output {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Per-node `timeout_ms` override, else the runtime default.
fn node_timeout(node: &Node, default_ms: u64) -> Result<u64, NodeError> {
    let Some(value) = node.data.get(NODE_TIMEOUT_KEY) else {
        return Ok(default_ms);
    };
    match value.as_u64() {
        Some(millis) if millis > 0 => Ok(millis),
        _ => Err(NodeError::InvalidConfig {
            field: NODE_TIMEOUT_KEY.to_string(),
            reason: format!("expected a positive integer of milliseconds, got {}", value),
        }),
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("Node panicked: {}", panic_message(err.into_panic()))
    } else {
        "Node task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::{Edge, Node, NodeType};
    use serde_json::json;

    fn data(value: serde_json::Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    fn fan_in() -> WorkflowGraph {
        WorkflowGraph::from_parts(
            vec![
                Node::new("a", NodeType::INITIAL, "A"),
                Node::new("b", NodeType::MERGE, "B"),
                Node::new("c", NodeType::INITIAL, "C"),
            ],
            vec![Edge::new("c", "b"), Edge::new("a", "b")],
        )
    }

    #[test]
    fn roots_receive_trigger_data() {
        let graph = fan_in();
        let trigger = data(json!({"seed": 1}));
        let input = gather_input(&graph, "a", &HashMap::new(), &HashMap::new(), &trigger);
        assert_eq!(input, trigger);
    }

    #[test]
    fn later_predecessor_wins_on_conflict() {
        let graph = fan_in();
        let position: HashMap<&str, usize> = [("a", 0), ("c", 1), ("b", 2)].into_iter().collect();
        let mut outputs = HashMap::new();
        outputs.insert("a", data(json!({"shared": "from a", "a": true})));
        outputs.insert("c", data(json!({"shared": "from c", "c": true})));

        let input = gather_input(&graph, "b", &position, &outputs, &DataMap::new());
        assert_eq!(input, data(json!({"shared": "from c", "a": true, "c": true})));
    }

    #[test]
    fn node_timeout_override_must_be_positive() {
        let node = |value: serde_json::Value| {
            Node::new("n", NodeType::HTTP_REQUEST, "n").with_config(NODE_TIMEOUT_KEY, value)
        };

        assert_eq!(node_timeout(&Node::new("n", NodeType::MERGE, "n"), 900).unwrap(), 900);
        assert_eq!(node_timeout(&node(json!(25)), 900).unwrap(), 25);
        for bad in [json!(0), json!(-5), json!(1.5), json!("100")] {
            let err = node_timeout(&node(bad.clone()), 900).unwrap_err();
            assert!(
                matches!(&err, NodeError::InvalidConfig { field, .. } if field == NODE_TIMEOUT_KEY),
                "{} gave {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn cancel_is_refused_once_settled() {
        let control = RunControl::new();
        assert!(control.settle());
        assert!(!control.cancel());
        assert!(!control.is_cancelled());
    }

    #[test]
    fn cancel_before_settle_wins() {
        let control = RunControl::new();
        assert!(control.cancel());
        assert!(control.cancel(), "repeated requests still report cancelled");
        assert!(control.token().is_cancelled());
        assert!(!control.settle());
    }

    #[test]
    fn token_cancelled_directly_still_wins() {
        let control = RunControl::new();
        control.token().cancel();
        assert!(!control.settle());
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic payload");
    }
}
