//! Execution record and its lifecycle.
//!
//! ```text
//! PENDING ──start──▶ RUNNING ──complete──▶ SUCCESS
//!    │                  │
//!    │                  ├──fail──▶ FAILED
//!    ├──fail────────────┘
//!    └──cancel──▶ CANCELLED ◀──cancel── RUNNING
//! ```
//!
//! Every transition is a guarded method. Terminal records reject all
//! transitions and stay untouched.

use crate::{DataMap, EngineError, NodeId, TransitionError, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Longest error message kept on a record.
pub const MAX_ERROR_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// How a run was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Webhook,
    Schedule,
    Test,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "webhook" => Ok(Self::Webhook),
            "schedule" | "scheduled" => Ok(Self::Schedule),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Outcome of one node within an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

pub type NodeResults = BTreeMap<NodeId, NodeResult>;

/// One run of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    id: ExecutionId,
    workflow_id: WorkflowId,
    user_id: String,
    status: ExecutionStatus,
    mode: ExecutionMode,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
    error: Option<String>,
    error_detail: Option<String>,
    node_results: NodeResults,
    trigger_data: DataMap,
    request_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Execution {
    /// Create a new `PENDING` execution.
    pub fn new(
        workflow_id: impl Into<WorkflowId>,
        user_id: impl Into<String>,
        mode: ExecutionMode,
    ) -> Result<Self, EngineError> {
        let workflow_id = workflow_id.into();
        let user_id = user_id.into();
        if workflow_id.trim().is_empty() {
            return Err(EngineError::InvalidExecution("workflow id is required".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(EngineError::InvalidExecution("user id is required".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            mode,
            started_at: now,
            finished_at: None,
            duration_ms: None,
            error: None,
            error_detail: None,
            node_results: NodeResults::new(),
            trigger_data: DataMap::new(),
            request_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_trigger_data(mut self, data: DataMap) -> Self {
        self.trigger_data = data;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn node_results(&self) -> &NodeResults {
        &self.node_results
    }

    pub fn trigger_data(&self) -> &DataMap {
        &self.trigger_data
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// PENDING → RUNNING. Refreshes the start timestamp.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Pending {
            return Err(self.rejected("start", "only pending executions can be started"));
        }
        let now = Utc::now();
        self.status = ExecutionStatus::Running;
        self.started_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING → SUCCESS.
    pub fn complete(&mut self, node_results: NodeResults) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Running {
            return Err(self.rejected("complete", "only running executions can be completed"));
        }
        self.finish(ExecutionStatus::Success);
        self.node_results = node_results;
        Ok(())
    }

    /// RUNNING or PENDING → FAILED.
    ///
    /// `node_results` of `None` keeps whatever results the record already has.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        detail: Option<String>,
        node_results: Option<NodeResults>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.rejected("fail", "only running or pending executions can be failed"));
        }
        self.finish(ExecutionStatus::Failed);
        self.error = Some(truncate(error.into()));
        self.error_detail = detail;
        if let Some(results) = node_results {
            self.node_results = results;
        }
        Ok(())
    }

    /// RUNNING or PENDING → CANCELLED.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.rejected(
                "cancel",
                "only running or pending executions can be cancelled",
            ));
        }
        self.finish(ExecutionStatus::Cancelled);
        Ok(())
    }

    /// Record partial results on a run that is still in flight.
    pub fn record_node_result(
        &mut self,
        node_id: impl Into<NodeId>,
        result: NodeResult,
    ) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Running {
            return Err(self.rejected(
                "record a node result on",
                "only running executions accept node results",
            ));
        }
        self.node_results.insert(node_id.into(), result);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn finish(&mut self, status: ExecutionStatus) {
        // Never earlier than the start, so the derived duration is never negative.
        let finished = Utc::now().max(self.started_at);
        self.status = status;
        self.finished_at = Some(finished);
        self.duration_ms = Some((finished - self.started_at).num_milliseconds().max(0) as u64);
        self.updated_at = finished;
    }

    fn rejected(&self, action: &'static str, reason: &'static str) -> TransitionError {
        TransitionError {
            action,
            from: self.status,
            reason,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn has_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    pub fn node_result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    pub fn is_node_successful(&self, node_id: &str) -> bool {
        self.node_result(node_id).is_some_and(|r| r.success)
    }

    pub fn failed_nodes(&self) -> Vec<&NodeId> {
        self.node_results
            .iter()
            .filter(|(_, result)| !result.success)
            .map(|(id, _)| id)
            .collect()
    }

    /// Human-readable duration, e.g. `"1h 2m 3s"`, `"4s"`, `"350ms"`.
    pub fn formatted_duration(&self) -> String {
        match self.duration_ms {
            None | Some(0) => "N/A".to_string(),
            Some(ms) => format_duration(ms),
        }
    }
}

fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else if seconds > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", ms)
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}
