use async_trait::async_trait;
use chrono::Utc;
use relaycore::{DataMap, ExecutionContext, ExecutionResult, NodeError, NodeExecutor, NodeType};
use relayruntime::{ExecutorFactory, ExecutorMetadata};
use serde_json::Value;

/// Entry point of a workflow. Forwards the trigger payload unchanged.
pub struct InitialNode;

#[async_trait]
impl NodeExecutor for InitialNode {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::ok(ctx.previous_data).with_node_type(NodeType::INITIAL))
    }
}

pub struct InitialNodeFactory;

impl ExecutorFactory for InitialNodeFactory {
    fn create(&self) -> Box<dyn NodeExecutor> {
        Box::new(InitialNode)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Start of a workflow; forwards the trigger data", "trigger")
            .with_output("data", "The trigger payload")
    }
}

/// Trigger node that stamps the payload with when and how the run started.
///
/// Keys already present in the payload take precedence over the stamp.
pub struct TriggerNode {
    node_type: &'static str,
    source: &'static str,
}

impl TriggerNode {
    pub fn manual() -> Self {
        Self {
            node_type: NodeType::MANUAL_TRIGGER,
            source: "manual",
        }
    }

    pub fn webhook() -> Self {
        Self {
            node_type: NodeType::WEBHOOK_TRIGGER,
            source: "webhook",
        }
    }

    pub fn schedule() -> Self {
        Self {
            node_type: NodeType::SCHEDULE_TRIGGER,
            source: "schedule",
        }
    }
}

#[async_trait]
impl NodeExecutor for TriggerNode {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let mut data = DataMap::new();
        data.insert("triggered_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        data.insert("triggered_by".to_string(), Value::String(self.source.to_string()));
        data.extend(ctx.previous_data);

        Ok(ExecutionResult::ok(data)
            .with_node_type(self.node_type)
            .with_metadata("trigger", self.source))
    }
}

pub struct TriggerNodeFactory {
    create: fn() -> TriggerNode,
    description: &'static str,
}

impl TriggerNodeFactory {
    pub fn manual() -> Self {
        Self {
            create: TriggerNode::manual,
            description: "Started by a user action",
        }
    }

    pub fn webhook() -> Self {
        Self {
            create: TriggerNode::webhook,
            description: "Started by an incoming webhook",
        }
    }

    pub fn schedule() -> Self {
        Self {
            create: TriggerNode::schedule,
            description: "Started on a schedule",
        }
    }
}

impl ExecutorFactory for TriggerNodeFactory {
    fn create(&self) -> Box<dyn NodeExecutor> {
        Box::new((self.create)())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new(self.description, "trigger")
            .with_output("triggered_at", "RFC 3339 timestamp of the trigger")
            .with_output("triggered_by", "Trigger source")
    }
}
