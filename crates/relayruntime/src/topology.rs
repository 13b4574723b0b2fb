//! Execution ordering.
//!
//! The sorter walks the dependency graph depth-first, keeping a visited set
//! and the active recursion stack. A node met again while it is still on
//! the stack closes a cycle. Nodes are emitted in post-order of the walk
//! over *predecessors*, so each node is emitted right after everything it
//! depends on, and independent branches come out in node array order.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use relaycore::{CycleError, NodeId, WorkflowGraph};

/// Order the graph's nodes so that for every edge `A -> B`, `A` comes first.
///
/// Edges whose endpoints are not in the graph are ignored; graph validation
/// reports those.
pub fn sort(graph: &WorkflowGraph) -> Result<Vec<NodeId>, CycleError> {
    let dependencies = graph.dependency_graph();
    let count = dependencies.node_count();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; count];
    let mut order: Vec<usize> = Vec::with_capacity(count);

    for root in 0..count {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        marks[root] = Mark::OnStack;
        let mut stack = vec![Frame::new(&dependencies, root)];

        while let Some(frame) = stack.last_mut() {
            match frame.next_dependency() {
                Some(dep) => match marks[dep] {
                    Mark::OnStack => return Err(cycle_error(graph, &stack, dep)),
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnStack;
                        stack.push(Frame::new(&dependencies, dep));
                    }
                    Mark::Done => {}
                },
                None => {
                    let node = frame.node;
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }

    let nodes = graph.nodes();
    Ok(order.into_iter().map(|idx| nodes[idx].id.clone()).collect())
}

/// One level of the depth-first walk: a node and its remaining predecessors.
struct Frame {
    node: usize,
    dependencies: Vec<usize>,
    next: usize,
}

impl Frame {
    fn new(dependencies: &DiGraph<usize, ()>, node: usize) -> Self {
        let mut deps: Vec<usize> = dependencies
            .neighbors_directed(NodeIndex::new(node), Direction::Incoming)
            .map(|idx| idx.index())
            .collect();
        // Array order, not petgraph's internal adjacency order.
        deps.sort_unstable();
        Self {
            node,
            dependencies: deps,
            next: 0,
        }
    }

    fn next_dependency(&mut self) -> Option<usize> {
        let dep = self.dependencies.get(self.next).copied();
        if dep.is_some() {
            self.next += 1;
        }
        dep
    }
}

/// The stack runs against edge direction (each frame is a predecessor of the
/// one below it), so the cycle is read back in reverse.
fn cycle_error(graph: &WorkflowGraph, stack: &[Frame], repeated: usize) -> CycleError {
    let nodes = graph.nodes();
    let start = stack
        .iter()
        .position(|frame| frame.node == repeated)
        .unwrap_or(0);

    let mut cycle = Vec::with_capacity(stack.len() - start + 1);
    cycle.push(nodes[repeated].id.clone());
    cycle.extend(stack[start + 1..].iter().rev().map(|f| nodes[f.node].id.clone()));
    cycle.push(nodes[repeated].id.clone());

    CycleError {
        node_id: nodes[repeated].id.clone(),
        cycle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::algo::{has_path_connecting, toposort};
    use proptest::prelude::*;
    use relaycore::{Edge, Node, NodeType};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        WorkflowGraph::from_parts(
            ids.iter()
                .map(|id| Node::new(*id, NodeType::HTTP_REQUEST, *id))
                .collect(),
            edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        )
    }

    fn position(order: &[NodeId], id: &str) -> usize {
        order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn linear_chain() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(sort(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn chain_declared_backwards() {
        let g = graph(&["c", "b", "a"], &[("a", "b"), ("b", "c")]);
        assert_eq!(sort(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        assert_eq!(sort(&g).unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn independent_roots_keep_array_order() {
        let g = graph(&["t1", "t2", "x", "y"], &[("t2", "y"), ("t1", "x")]);
        assert_eq!(sort(&g).unwrap(), vec!["t1", "t2", "x", "y"]);
    }

    #[test]
    fn fan_in_visits_predecessors_in_array_order() {
        let g = graph(&["a", "b", "c"], &[("c", "b"), ("a", "b")]);
        assert_eq!(sort(&g).unwrap(), vec!["a", "c", "b"]);
    }

    #[test]
    fn isolated_nodes_are_emitted_once() {
        let g = graph(&["lonely", "a", "b", "island"], &[("a", "b")]);
        let order = sort(&g).unwrap();
        assert_eq!(order, vec!["lonely", "a", "b", "island"]);
    }

    #[test]
    fn parallel_edges_count_once() {
        let g = WorkflowGraph::from_parts(
            vec![
                Node::new("a", NodeType::INITIAL, "a"),
                Node::new("b", NodeType::HTTP_REQUEST, "b"),
            ],
            vec![
                Edge::new("a", "b"),
                Edge::new("a", "b").with_handles("alt", "main"),
            ],
        );
        assert_eq!(sort(&g).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn two_node_cycle() {
        let g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let err = sort(&g).unwrap_err();
        assert_eq!(err.node_id, "a");
        assert_eq!(err.cycle, vec!["a", "b", "a"]);
    }

    #[test]
    fn cycle_behind_a_valid_prefix() {
        let g = graph(
            &["start", "x", "y", "z"],
            &[("start", "x"), ("x", "y"), ("y", "z"), ("z", "x")],
        );
        let err = sort(&g).unwrap_err();
        assert!(["x", "y", "z"].contains(&err.node_id.as_str()));
        assert_eq!(err.cycle.first(), err.cycle.last());
        assert_eq!(err.cycle.len(), 4);
        // Every step of the reported cycle is a real edge.
        for pair in err.cycle.windows(2) {
            assert!(g.edges().iter().any(|e| e.connects(&pair[0], &pair[1])), "{:?}", pair);
        }
    }

    #[test]
    fn empty_graph_sorts_to_nothing() {
        assert!(sort(&WorkflowGraph::new()).unwrap().is_empty());
    }

    /// Node count, then candidate edges as index pairs. Self pairs are
    /// skipped when the graph is built.
    fn shape() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..12).prop_flat_map(|size| {
            (
                Just(size),
                proptest::collection::vec((0..size, 0..size), 0..30),
            )
        })
    }

    /// Nodes are declared in `declared` order; edges point from `ids[from]`
    /// to `ids[to]`, and only forward in id order when `acyclic`.
    fn build(declared: &[usize], pairs: &[(usize, usize)], acyclic: bool) -> WorkflowGraph {
        let id = |i: usize| format!("n{}", i);
        let mut g = WorkflowGraph::new();
        for &i in declared {
            g.add_node(Node::new(id(i), NodeType::HTTP_REQUEST, id(i))).unwrap();
        }
        for &(a, b) in pairs {
            if a == b {
                continue;
            }
            let (from, to) = if acyclic && a > b { (b, a) } else { (a, b) };
            let _ = g.add_edge(Edge::new(id(from), id(to)));
        }
        g
    }

    fn shuffled(size: usize) -> impl Strategy<Value = Vec<usize>> {
        Just((0..size).collect::<Vec<_>>()).prop_shuffle()
    }

    proptest! {
        #[test]
        fn acyclic_graphs_respect_every_edge(
            (declared, pairs) in shape().prop_flat_map(|(size, pairs)| (shuffled(size), Just(pairs)))
        ) {
            let g = build(&declared, &pairs, true);
            let order = sort(&g).expect("acyclic graph must sort");

            prop_assert_eq!(order.len(), g.nodes().len());
            for edge in g.edges() {
                prop_assert!(position(&order, &edge.source) < position(&order, &edge.target));
            }
            prop_assert_eq!(sort(&g).unwrap(), order);
        }

        #[test]
        fn sort_agrees_with_petgraph_on_cycles(
            (declared, pairs) in shape().prop_flat_map(|(size, pairs)| (shuffled(size), Just(pairs)))
        ) {
            let g = build(&declared, &pairs, false);
            let dependencies = g.dependency_graph();

            match sort(&g) {
                Ok(order) => {
                    prop_assert!(toposort(&dependencies, None).is_ok());
                    for edge in g.edges() {
                        prop_assert!(position(&order, &edge.source) < position(&order, &edge.target));
                    }
                }
                Err(err) => {
                    prop_assert!(toposort(&dependencies, None).is_err());
                    prop_assert!(g.has_cycles());
                    let ids: Vec<NodeId> = g.nodes().iter().map(|n| n.id.clone()).collect();
                    let idx = NodeIndex::new(position(&ids, &err.node_id));
                    let on_cycle = dependencies
                        .neighbors_directed(idx, Direction::Outgoing)
                        .any(|next| has_path_connecting(&dependencies, next, idx, None));
                    prop_assert!(on_cycle, "{} is not on a cycle", err.node_id);
                }
            }
        }
    }
}
