use async_trait::async_trait;
use relaycore::{ExecutionContext, ExecutionResult, NodeError, NodeExecutor, NodeType};
use relayruntime::{ExecutorFactory, ExecutorMetadata};
use serde_json::Value;

/// Reshape the input map.
///
/// Applied in order: `rename` (object of old name to new name), `remove`
/// (array of keys), then `set` (object of keys to values).
pub struct DataTransformerNode;

impl DataTransformerNode {
    fn invalid(field: &str, expected: &str) -> NodeError {
        NodeError::InvalidConfig {
            field: field.to_string(),
            reason: format!("expected {}", expected),
        }
    }
}

#[async_trait]
impl NodeExecutor for DataTransformerNode {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let mut data = ctx.previous_data;

        match ctx.config.get("rename") {
            None => {}
            Some(Value::Object(renames)) => {
                for (from, to) in renames {
                    let Some(to) = to.as_str() else {
                        return Ok(Self::invalid("rename", "string target names").into());
                    };
                    if let Some(value) = data.remove(from) {
                        data.insert(to.to_string(), value);
                    }
                }
            }
            Some(_) => return Ok(Self::invalid("rename", "an object").into()),
        }

        match ctx.config.get("remove") {
            None => {}
            Some(Value::Array(keys)) => {
                for key in keys.iter().filter_map(Value::as_str) {
                    data.remove(key);
                }
            }
            Some(_) => return Ok(Self::invalid("remove", "an array of keys").into()),
        }

        match ctx.config.get("set") {
            None => {}
            Some(Value::Object(values)) => {
                for (key, value) in values {
                    data.insert(key.clone(), value.clone());
                }
            }
            Some(_) => return Ok(Self::invalid("set", "an object").into()),
        }

        Ok(ExecutionResult::ok(data).with_node_type(NodeType::DATA_TRANSFORMER))
    }
}

pub struct DataTransformerNodeFactory;

impl ExecutorFactory for DataTransformerNodeFactory {
    fn create(&self) -> Box<dyn NodeExecutor> {
        Box::new(DataTransformerNode)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Rename, remove and set fields", "transform")
            .with_input("rename", "Map of old key to new key", false)
            .with_input("remove", "Keys to drop", false)
            .with_input("set", "Keys to add or overwrite", false)
    }
}

/// Join point for fan-in. The runtime already merged the predecessors'
/// outputs, so this forwards its input.
pub struct MergeNode;

#[async_trait]
impl NodeExecutor for MergeNode {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let inputs = ctx.previous_data.len();
        Ok(ExecutionResult::ok(ctx.previous_data)
            .with_node_type(NodeType::MERGE)
            .with_metadata("merged_keys", inputs))
    }
}

pub struct MergeNodeFactory;

impl ExecutorFactory for MergeNodeFactory {
    fn create(&self) -> Box<dyn NodeExecutor> {
        Box::new(MergeNode)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::new("Combine the outputs of several branches", "transform")
    }
}
