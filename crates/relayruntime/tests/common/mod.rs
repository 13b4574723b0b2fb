#![allow(dead_code)]

use async_trait::async_trait;
use relaycore::{
    DataMap, EngineError, Execution, ExecutionContext, ExecutionId, ExecutionResult, NodeError,
    NodeExecutor, NodeType, StoreError, WorkflowGraph,
};
use relayruntime::{
    ExecutionStore, ExecutorRegistry, InMemoryExecutionStore, InMemoryWorkflowStore, Runtime,
    RuntimeConfig, TriggerInput,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WORKFLOW: &str = "wf-1";
pub const USER: &str = "user-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn data(value: serde_json::Value) -> DataMap {
    value.as_object().cloned().unwrap_or_default()
}

/// Forwards its input.
pub struct Passthrough;

#[async_trait]
impl NodeExecutor for Passthrough {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::ok(ctx.previous_data))
    }
}

/// Returns `{"<node_id>": true, "seen": <input>}` plus any `emit` config.
pub struct Tagger;

#[async_trait]
impl NodeExecutor for Tagger {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let mut out = DataMap::new();
        out.insert(ctx.node_id.clone(), json!(true));
        out.insert("seen".to_string(), serde_json::Value::Object(ctx.previous_data.clone()));
        if let Some(serde_json::Value::Object(extra)) = ctx.config.get("emit") {
            for (k, v) in extra {
                out.insert(k.clone(), v.clone());
            }
        }
        Ok(ExecutionResult::ok(out))
    }
}

/// Fails with the configured `error` message.
pub struct Failing;

#[async_trait]
impl NodeExecutor for Failing {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let error = ctx.config_str("error").unwrap_or("failed").to_string();
        Ok(ExecutionResult::failure(error))
    }
}

pub struct Erroring;

#[async_trait]
impl NodeExecutor for Erroring {
    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        Err(NodeError::ExecutionFailed("disk on fire".to_string()))
    }
}

pub struct Panicking;

#[async_trait]
impl NodeExecutor for Panicking {
    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        panic!("executor blew up");
    }
}

/// Sleeps for `sleep_ms` from config, ignoring cancellation.
pub struct Sleepy;

#[async_trait]
impl NodeExecutor for Sleepy {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let millis = ctx.config.get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(ExecutionResult::ok(ctx.previous_data))
    }
}

pub struct Rejecting;

#[async_trait]
impl NodeExecutor for Rejecting {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::ok(ctx.previous_data))
    }

    async fn validate(&self, _ctx: &ExecutionContext) -> bool {
        false
    }
}

/// Sleeps for `sleep_ms` without looking at the cancellation token, then
/// counts one finished run.
pub struct Lingering(pub Arc<AtomicUsize>);

#[async_trait]
impl NodeExecutor for Lingering {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let millis = ctx.config.get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::ok(ctx.previous_data))
    }
}

/// Waits for `sleep_ms` or the cancellation signal, counting the signals seen.
pub struct Cooperative(pub Arc<AtomicUsize>);

#[async_trait]
impl NodeExecutor for Cooperative {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let millis = ctx.config.get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(50);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(ExecutionResult::ok(ctx.previous_data)),
            _ = ctx.cancellation.cancelled() => {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(NodeError::Cancelled)
            }
        }
    }
}

/// Counts invocations across all instances sharing the counter.
pub struct Counting(pub Arc<AtomicUsize>);

#[async_trait]
impl NodeExecutor for Counting {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ExecutionResult::ok(ctx.previous_data))
    }
}

pub const TAGGER: &str = "TEST_TAGGER";
pub const FAILING: &str = "TEST_FAILING";
pub const ERRORING: &str = "TEST_ERRORING";
pub const PANICKING: &str = "TEST_PANICKING";
pub const SLEEPY: &str = "TEST_SLEEPY";
pub const REJECTING: &str = "TEST_REJECTING";
pub const COUNTING: &str = "TEST_COUNTING";
pub const LINGERING: &str = "TEST_LINGERING";
pub const COOPERATIVE: &str = "TEST_COOPERATIVE";

pub fn registry(counter: Arc<AtomicUsize>) -> ExecutorRegistry {
    registry_with(counter, Arc::new(AtomicUsize::new(0)))
}

/// `finished` is shared by the lingering and cooperative executors.
pub fn registry_with(counter: Arc<AtomicUsize>, finished: Arc<AtomicUsize>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register_fn(NodeType::INITIAL, || Box::new(Passthrough));
    registry.register_fn(NodeType::MERGE, || Box::new(Passthrough));
    registry.register_fn(NodeType::HTTP_REQUEST, || Box::new(Tagger));
    registry.register_fn(TAGGER, || Box::new(Tagger));
    registry.register_fn(FAILING, || Box::new(Failing));
    registry.register_fn(ERRORING, || Box::new(Erroring));
    registry.register_fn(PANICKING, || Box::new(Panicking));
    registry.register_fn(SLEEPY, || Box::new(Sleepy));
    registry.register_fn(REJECTING, || Box::new(Rejecting));
    registry.register_fn(COUNTING, move || Box::new(Counting(counter.clone())));
    let lingering = finished.clone();
    registry.register_fn(LINGERING, move || Box::new(Lingering(lingering.clone())));
    registry.register_fn(COOPERATIVE, move || Box::new(Cooperative(finished.clone())));
    registry
}

pub struct Harness {
    pub runtime: Runtime,
    pub workflows: Arc<InMemoryWorkflowStore>,
    pub executions: Arc<InMemoryExecutionStore>,
    pub counter: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let counter = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let runtime = Runtime::new(
            config,
            Arc::new(registry_with(counter.clone(), finished.clone())),
            workflows.clone(),
            executions.clone(),
        );
        Self {
            runtime,
            workflows,
            executions,
            counter,
            finished,
        }
    }

    pub async fn with_graph(self, graph: WorkflowGraph) -> Self {
        self.workflows.put(WORKFLOW, graph).await;
        self
    }

    pub async fn execute(&self) -> Execution {
        self.execute_with(DataMap::new()).await
    }

    pub async fn execute_with(&self, trigger_data: DataMap) -> Execution {
        self.runtime
            .execute(TriggerInput::new(WORKFLOW, USER).with_data(trigger_data))
            .await
            .expect("execution should reach a terminal state")
    }

    pub fn invocations(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Execution store whose updates fail a configurable number of times.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryExecutionStore,
    failures_left: Mutex<usize>,
    pub update_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: Mutex::new(times),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ExecutionStore for FlakyStore {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
        self.inner.create(execution).await
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Backend("connection reset".to_string()));
            }
        }
        self.inner.update(execution).await
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        self.inner.find_by_id(id).await
    }
}

/// Execution store that takes `delay` to write terminal records.
pub struct SlowStore {
    inner: InMemoryExecutionStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryExecutionStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl ExecutionStore for SlowStore {
    async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
        self.inner.create(execution).await
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        if execution.status().is_terminal() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update(execution).await
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        self.inner.find_by_id(id).await
    }
}

pub fn is_store_error(err: &EngineError) -> bool {
    matches!(err, EngineError::Store(_))
}
