//! Workflow graph model
//!
//! Nodes and edges live in flat arenas; edges refer to nodes by id only.
//! Editing operations enforce the structural rules immediately, while
//! [`validate`] re-checks a whole snapshot (for example one loaded from a
//! store) before it is executed.

use crate::GraphError;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub type NodeId = String;
pub type WorkflowId = String;

/// Free-form JSON object used for node configuration and node output.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Handle used when an edge does not name a port.
pub const DEFAULT_HANDLE: &str = "main";

const MAX_HANDLE_LEN: usize = 50;
const MAX_NODE_NAME_LEN: usize = 100;

/// Broad grouping of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    Transform,
    Integration,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeCategory::Trigger => "trigger",
            NodeCategory::Action => "action",
            NodeCategory::Transform => "transform",
            NodeCategory::Integration => "integration",
        };
        f.write_str(name)
    }
}

/// Node type tag (e.g. `"HTTP_REQUEST"`).
///
/// The set of tags is open: the built-in catalog below covers the types the
/// product ships with, and registering an executor makes any other tag
/// runnable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeType(String);

impl NodeType {
    pub const INITIAL: &'static str = "INITIAL";
    pub const MANUAL_TRIGGER: &'static str = "MANUAL_TRIGGER";
    pub const WEBHOOK_TRIGGER: &'static str = "WEBHOOK_TRIGGER";
    pub const SCHEDULE_TRIGGER: &'static str = "SCHEDULE_TRIGGER";
    pub const EMAIL_TRIGGER: &'static str = "EMAIL_TRIGGER";
    pub const HTTP_REQUEST: &'static str = "HTTP_REQUEST";
    pub const SEND_EMAIL: &'static str = "SEND_EMAIL";
    pub const DATABASE_QUERY: &'static str = "DATABASE_QUERY";
    pub const DATA_TRANSFORMER: &'static str = "DATA_TRANSFORMER";
    pub const CODE_EXECUTOR: &'static str = "CODE_EXECUTOR";
    pub const FILTER: &'static str = "FILTER";
    pub const ROUTER: &'static str = "ROUTER";
    pub const MERGE: &'static str = "MERGE";
    pub const SPLIT: &'static str = "SPLIT";
    pub const GOOGLE_SHEETS: &'static str = "GOOGLE_SHEETS";
    pub const SLACK: &'static str = "SLACK";
    pub const GITHUB: &'static str = "GITHUB";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Category of a built-in tag, `None` for custom tags.
    pub fn category(&self) -> Option<NodeCategory> {
        BUILTIN_NODE_TYPES
            .iter()
            .find(|(tag, _)| *tag == self.0)
            .map(|(_, category)| *category)
    }

    pub fn is_builtin(&self) -> bool {
        self.category().is_some()
    }

    pub fn is_trigger(&self) -> bool {
        self.category() == Some(NodeCategory::Trigger)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for NodeType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl std::borrow::Borrow<str> for NodeType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Built-in node types and their categories.
pub const BUILTIN_NODE_TYPES: &[(&str, NodeCategory)] = &[
    (NodeType::INITIAL, NodeCategory::Trigger),
    (NodeType::MANUAL_TRIGGER, NodeCategory::Trigger),
    (NodeType::WEBHOOK_TRIGGER, NodeCategory::Trigger),
    (NodeType::SCHEDULE_TRIGGER, NodeCategory::Trigger),
    (NodeType::EMAIL_TRIGGER, NodeCategory::Trigger),
    (NodeType::HTTP_REQUEST, NodeCategory::Action),
    (NodeType::SEND_EMAIL, NodeCategory::Action),
    (NodeType::DATABASE_QUERY, NodeCategory::Action),
    (NodeType::DATA_TRANSFORMER, NodeCategory::Transform),
    (NodeType::CODE_EXECUTOR, NodeCategory::Transform),
    (NodeType::FILTER, NodeCategory::Transform),
    (NodeType::ROUTER, NodeCategory::Transform),
    (NodeType::MERGE, NodeCategory::Transform),
    (NodeType::SPLIT, NodeCategory::Transform),
    (NodeType::GOOGLE_SHEETS, NodeCategory::Integration),
    (NodeType::SLACK, NodeCategory::Integration),
    (NodeType::GITHUB, NodeCategory::Integration),
];

/// Decides which node type tags a graph may use.
pub trait NodeCatalog {
    fn recognizes(&self, node_type: &NodeType) -> bool;
}

/// Catalog containing only the built-in tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl NodeCatalog for BuiltinCatalog {
    fn recognizes(&self, node_type: &NodeType) -> bool {
        node_type.is_builtin()
    }
}

/// Node position in the visual editor. Not used by execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn check(&self) -> Result<(), &'static str> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err("position coordinates must be finite numbers");
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err("position coordinates cannot be negative");
        }
        Ok(())
    }
}

/// A unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    /// Executor configuration.
    #[serde(default)]
    pub data: DataMap,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        node_type: impl Into<NodeType>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: name.into(),
            position: Position::default(),
            data: DataMap::new(),
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    fn check(&self) -> Result<(), GraphError> {
        if self.name.trim().is_empty() {
            return Err(GraphError::InvalidName {
                node_id: self.id.clone(),
                reason: "node name cannot be empty".to_string(),
            });
        }
        if self.name.chars().count() > MAX_NODE_NAME_LEN {
            return Err(GraphError::InvalidName {
                node_id: self.id.clone(),
                reason: format!("node name cannot exceed {} characters", MAX_NODE_NAME_LEN),
            });
        }
        self.position
            .check()
            .map_err(|reason| GraphError::InvalidPosition {
                node_id: self.id.clone(),
                reason: reason.to_string(),
            })
    }
}

/// Directed data-flow connection between two node handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default = "default_handle", deserialize_with = "deserialize_handle")]
    pub source_handle: String,
    #[serde(default = "default_handle", deserialize_with = "deserialize_handle")]
    pub target_handle: String,
}

fn default_handle() -> String {
    DEFAULT_HANDLE.to_string()
}

fn normalize_handle(handle: &str) -> String {
    let trimmed = handle.trim();
    if trimmed.is_empty() {
        default_handle()
    } else {
        trimmed.to_string()
    }
}

fn deserialize_handle<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let handle = Option::<String>::deserialize(deserializer)?;
    Ok(handle.as_deref().map(normalize_handle).unwrap_or_else(default_handle))
}

impl Edge {
    /// Edge between the default `main` handles.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: default_handle(),
            target_handle: default_handle(),
        }
    }

    pub fn with_handles(mut self, source_handle: &str, target_handle: &str) -> Self {
        self.source_handle = normalize_handle(source_handle);
        self.target_handle = normalize_handle(target_handle);
        self
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }

    pub fn connects(&self, source: &str, target: &str) -> bool {
        self.source == source && self.target == target
    }
}

pub fn validate_handle(handle: &str) -> Result<(), GraphError> {
    let invalid = |reason: &str| GraphError::InvalidHandle {
        handle: handle.to_string(),
        reason: reason.to_string(),
    };
    if handle.trim().is_empty() {
        return Err(invalid("handle cannot be empty"));
    }
    if handle.len() > MAX_HANDLE_LEN {
        return Err(invalid("handle cannot exceed 50 characters"));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            "handle can only contain alphanumeric characters and underscores",
        ));
    }
    Ok(())
}

/// Validate a graph snapshot.
///
/// Checks, in order: node ids are unique, node types are recognized by
/// `catalog`, node names and positions are well formed, then for every edge:
/// no self-loop, both endpoints exist, handles are well formed, and the
/// `(source, source_handle, target, target_handle)` tuple is unique.
pub fn validate(
    nodes: &[Node],
    edges: &[Edge],
    catalog: &dyn NodeCatalog,
) -> Result<(), GraphError> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
        if !catalog.recognizes(&node.node_type) {
            return Err(GraphError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.to_string(),
            });
        }
        node.check()?;
    }

    let mut connections: HashSet<(&str, &str, &str, &str)> = HashSet::with_capacity(edges.len());
    for edge in edges {
        check_edge(edge, &ids)?;
        let key = (
            edge.source.as_str(),
            edge.source_handle.as_str(),
            edge.target.as_str(),
            edge.target_handle.as_str(),
        );
        if !connections.insert(key) {
            return Err(duplicate_edge(edge));
        }
    }

    Ok(())
}

fn check_edge(edge: &Edge, ids: &HashSet<&str>) -> Result<(), GraphError> {
    if edge.source == edge.target {
        return Err(GraphError::SelfLoop(edge.source.clone()));
    }
    for endpoint in [&edge.source, &edge.target] {
        if !ids.contains(endpoint.as_str()) {
            return Err(GraphError::DanglingEdge {
                source_id: edge.source.clone(),
                target: edge.target.clone(),
                missing: endpoint.clone(),
            });
        }
    }
    validate_handle(&edge.source_handle)?;
    validate_handle(&edge.target_handle)
}

fn duplicate_edge(edge: &Edge) -> GraphError {
    GraphError::DuplicateEdge {
        source_id: edge.source.clone(),
        source_handle: edge.source_handle.clone(),
        target: edge.target.clone(),
        target_handle: edge.target_handle.clone(),
    }
}

/// Nodes and edges of one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph without checking it. Use [`WorkflowGraph::validate`]
    /// before running it.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Map from node id to its index in the node arena.
    pub fn index(&self) -> HashMap<&str, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id.as_str(), idx))
            .collect()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.contains_node(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        node.check()?;
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, GraphError> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let node = self.nodes.remove(idx);
        self.edges.retain(|edge| !edge.touches(id));
        Ok(node)
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let edge = Edge {
            source_handle: normalize_handle(&edge.source_handle),
            target_handle: normalize_handle(&edge.target_handle),
            ..edge
        };
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        check_edge(&edge, &ids)?;
        if self.edges.contains(&edge) {
            return Err(duplicate_edge(&edge));
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Remove the edge with the same endpoints and handles as `edge`.
    pub fn remove_edge(&mut self, edge: &Edge) -> Result<Edge, GraphError> {
        let idx = self
            .edges
            .iter()
            .position(|e| e == edge)
            .ok_or_else(|| GraphError::EdgeNotFound {
                source_id: edge.source.clone(),
                target: edge.target.clone(),
            })?;
        Ok(self.edges.remove(idx))
    }

    /// Direct predecessors of `id`, in edge order, without repeats.
    pub fn predecessors(&self, id: &str) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| &e.source)
            .filter(|source| seen.insert(source.as_str()))
            .collect()
    }

    /// Direct successors of `id`, in edge order, without repeats.
    pub fn successors(&self, id: &str) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| &e.target)
            .filter(|target| seen.insert(target.as_str()))
            .collect()
    }

    /// Nodes linked to `id` by an edge in either direction.
    pub fn connected_nodes(&self, id: &str) -> Vec<&Node> {
        let linked: HashSet<&str> = self
            .edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some(e.target.as_str())
                } else if e.target == id {
                    Some(e.source.as_str())
                } else {
                    None
                }
            })
            .collect();
        self.nodes
            .iter()
            .filter(|n| linked.contains(n.id.as_str()))
            .collect()
    }

    /// Dependency graph whose node weights, and node indices, are positions
    /// in the node arena. Parallel edges collapse into one.
    pub fn dependency_graph(&self) -> DiGraph<usize, ()> {
        let mut dependencies = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        for idx in 0..self.nodes.len() {
            dependencies.add_node(idx);
        }

        let index = self.index();
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) {
                dependencies.update_edge(NodeIndex::new(from), NodeIndex::new(to), ());
            }
        }
        dependencies
    }

    /// Quick cycle check. The sorter reports where the cycle is.
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.dependency_graph())
    }

    pub fn validate(&self, catalog: &dyn NodeCatalog) -> Result<(), GraphError> {
        validate(&self.nodes, &self.edges, catalog)
    }
}

/// A stored workflow: identity plus its graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub graph: WorkflowGraph,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            graph: WorkflowGraph::new(),
        }
    }

    pub fn with_graph(mut self, graph: WorkflowGraph) -> Self {
        self.graph = graph;
        self
    }
}
