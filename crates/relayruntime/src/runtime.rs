use crate::{ExecutionStore, ExecutorRegistry, Orchestrator, RunControl, WorkflowStore};
use relaycore::{
    DataMap, EngineError, EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionMode,
    ExecutionStatus, TransitionError, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Prefix of environment variables read by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "RELAY_";

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default per-node timeout. Nodes override it with `timeout_ms` in their data.
    pub node_timeout_ms: u64,
    pub event_buffer_size: usize,
    /// Runs the job queue executes at once.
    pub max_concurrent_runs: usize,
    pub queue_capacity: usize,
    /// Attempts at writing the final execution record before giving up.
    pub persist_attempts: u32,
    /// Injected into every node's context.
    pub environment: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: 30_000,
            event_buffer_size: 1000,
            max_concurrent_runs: 4,
            queue_capacity: 256,
            persist_attempts: 3,
            environment: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `RELAY_*` process environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::default().with_env_overrides(std::env::vars())
    }

    /// Apply `RELAY_NODE_TIMEOUT_MS`, `RELAY_EVENT_BUFFER_SIZE`,
    /// `RELAY_MAX_CONCURRENT_RUNS`, `RELAY_QUEUE_CAPACITY` and
    /// `RELAY_PERSIST_ATTEMPTS`. `RELAY_ENV_<NAME>` becomes `<NAME>` in the
    /// node environment.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "NODE_TIMEOUT_MS" => self.node_timeout_ms = parse(&key, &value)?,
                "EVENT_BUFFER_SIZE" => self.event_buffer_size = parse(&key, &value)?,
                "MAX_CONCURRENT_RUNS" => self.max_concurrent_runs = parse(&key, &value)?,
                "QUEUE_CAPACITY" => self.queue_capacity = parse(&key, &value)?,
                "PERSIST_ATTEMPTS" => self.persist_attempts = parse(&key, &value)?,
                other => {
                    if let Some(env_name) = other.strip_prefix("ENV_") {
                        if !env_name.is_empty() {
                            self.environment.insert(env_name.to_string(), value);
                        }
                    }
                }
            }
        }
        self.check()?;
        Ok(self)
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.node_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig("node_timeout_ms must be positive".into()));
        }
        if self.max_concurrent_runs == 0 {
            return Err(EngineError::InvalidConfig("max_concurrent_runs must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EngineError> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("{} has invalid value '{}'", key, value)))
}

/// A request to run a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInput {
    pub workflow_id: WorkflowId,
    pub user_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub trigger_data: DataMap,
}

impl TriggerInput {
    pub fn new(workflow_id: impl Into<WorkflowId>, user_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            request_id: None,
            mode: ExecutionMode::default(),
            trigger_data: DataMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.trigger_data = data;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

type ActiveRuns = Arc<Mutex<HashMap<ExecutionId, RunControl>>>;

/// Main runtime for executing workflows
#[derive(Clone)]
pub struct Runtime {
    config: Arc<RuntimeConfig>,
    registry: Arc<ExecutorRegistry>,
    executions: Arc<dyn ExecutionStore>,
    event_bus: Arc<EventBus>,
    orchestrator: Orchestrator,
    active: ActiveRuns,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<ExecutorRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
    ) -> Self {
        let config = Arc::new(config);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let orchestrator = Orchestrator::new(
            registry.clone(),
            workflows,
            executions.clone(),
            event_bus.clone(),
            config.clone(),
        );

        Self {
            config,
            registry,
            executions,
            event_bus,
            orchestrator,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Create and store a PENDING execution for `trigger`.
    pub async fn submit(&self, trigger: TriggerInput) -> Result<Execution, EngineError> {
        let execution = Execution::new(trigger.workflow_id, trigger.user_id, trigger.mode)?
            .with_trigger_data(trigger.trigger_data)
            .with_request_id(trigger.request_id);
        self.executions.create(&execution).await?;
        info!(
            execution_id = %execution.id(),
            workflow_id = %execution.workflow_id(),
            mode = ?execution.mode(),
            "Execution submitted"
        );
        Ok(execution)
    }

    /// Run a stored execution. Deliveries of an execution that is already in
    /// flight, or no longer PENDING, are rejected without running anything.
    pub async fn run(&self, execution_id: ExecutionId) -> Result<Execution, EngineError> {
        let Some(claim) = Claim::acquire(&self.active, execution_id) else {
            warn!(execution_id = %execution_id, "Rejecting duplicate delivery of an execution in flight");
            return Err(TransitionError {
                action: "start",
                from: ExecutionStatus::Running,
                reason: "execution is already being processed",
            }
            .into());
        };

        let execution = self
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

        self.orchestrator.run(execution, claim.control.clone()).await
    }

    /// Submit and run in one call.
    pub async fn execute(&self, trigger: TriggerInput) -> Result<Execution, EngineError> {
        let execution = self.submit(trigger).await?;
        self.run(execution.id()).await
    }

    /// Request cancellation. Returns `false` when the execution had already
    /// finished, or has already settled on its outcome and is being recorded.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<bool, EngineError> {
        let claim = {
            let mut active = lock(&self.active);
            if let Some(control) = active.get(&execution_id) {
                if control.cancel() {
                    info!(execution_id = %execution_id, "Cancelling running execution");
                    return Ok(true);
                }
                debug!(execution_id = %execution_id, "Execution already settled, nothing to cancel");
                return Ok(false);
            }
            // Hold the id so no worker starts it while the record is updated.
            let control = RunControl::new();
            active.insert(execution_id, control.clone());
            Claim {
                active: self.active.clone(),
                execution_id,
                control,
            }
        };

        let mut execution = self
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status().is_terminal() {
            return Ok(false);
        }

        execution.cancel()?;
        self.executions.update(&execution).await?;
        info!(execution_id = %execution_id, "Cancelled pending execution");
        self.event_bus.emit(ExecutionEvent::ExecutionFinished {
            execution_id,
            status: execution.status(),
            duration_ms: execution.duration_ms().unwrap_or(0),
            error: None,
            timestamp: chrono::Utc::now(),
        });
        drop(claim);
        Ok(true)
    }

    pub async fn get(&self, execution_id: ExecutionId) -> Result<Option<Execution>, EngineError> {
        Ok(self.executions.find_by_id(execution_id).await?)
    }

    /// Ids of executions currently being processed.
    pub fn active_executions(&self) -> Vec<ExecutionId> {
        lock(&self.active).keys().copied().collect()
    }
}

/// Marks an execution id as in flight until dropped.
struct Claim {
    active: ActiveRuns,
    execution_id: ExecutionId,
    control: RunControl,
}

impl Claim {
    fn acquire(active: &ActiveRuns, execution_id: ExecutionId) -> Option<Self> {
        let mut runs = lock(active);
        if runs.contains_key(&execution_id) {
            return None;
        }
        let control = RunControl::new();
        runs.insert(execution_id, control.clone());
        Some(Self {
            active: active.clone(),
            execution_id,
            control,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.execution_id);
    }
}

/// The map is only touched in short non-async sections; a poisoned lock
/// still holds a consistent map.
fn lock(
    active: &ActiveRuns,
) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, RunControl>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
