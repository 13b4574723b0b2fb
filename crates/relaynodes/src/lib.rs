//! Standard node library
//!
//! Built-in executors for the trigger, HTTP and transform node types.

mod http;
mod transform;
mod trigger;

pub use http::{HttpRequestNode, HttpRequestNodeFactory};
pub use transform::{DataTransformerNode, DataTransformerNodeFactory, MergeNode, MergeNodeFactory};
pub use trigger::{InitialNode, InitialNodeFactory, TriggerNode, TriggerNodeFactory};

use relaycore::NodeType;
use relayruntime::ExecutorRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(NodeType::INITIAL, Arc::new(InitialNodeFactory));
    registry.register(NodeType::MANUAL_TRIGGER, Arc::new(TriggerNodeFactory::manual()));
    registry.register(NodeType::WEBHOOK_TRIGGER, Arc::new(TriggerNodeFactory::webhook()));
    registry.register(NodeType::SCHEDULE_TRIGGER, Arc::new(TriggerNodeFactory::schedule()));
    registry.register(NodeType::HTTP_REQUEST, Arc::new(HttpRequestNodeFactory));
    registry.register(NodeType::DATA_TRANSFORMER, Arc::new(DataTransformerNodeFactory));
    registry.register(NodeType::MERGE, Arc::new(MergeNodeFactory));
}

/// A registry holding every standard node.
pub fn standard_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    registry
}
