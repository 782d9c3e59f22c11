//! Service graph construction, topology checking, and type inference
//! (spec.md §3 "Service graph", §4.4).

mod types;

pub use types::{ExactMatchResolver, TypeResolver};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{codes, ErrorCategory, PlumberError, Result};
use crate::pipe::descriptor::PipeFlags;
use crate::servlet::ServletDescriptor;
use crate::task::NodeId;

/// `(src_node, src_pd) -> (dst_node, dst_pd)` (spec.md §3 "Pipe binding").
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src_node: NodeId,
    pub src_pd: usize,
    pub dst_node: NodeId,
    pub dst_pd: usize,
}

struct BufferedNode {
    servlet: Arc<ServletDescriptor>,
}

/// The *buffer* builder (spec.md §4.4): accumulates nodes and edges, then
/// [`GraphBuilder::freeze`] validates and produces a [`ServiceGraph`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<BufferedNode>,
    edges: Vec<Edge>,
    input_endpoint: Option<(NodeId, usize)>,
    output_endpoint: Option<(NodeId, usize)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, servlet: Arc<ServletDescriptor>) -> NodeId {
        self.nodes.push(BufferedNode { servlet });
        self.nodes.len() - 1
    }

    pub fn add_edge(&mut self, src_node: NodeId, src_pd: usize, dst_node: NodeId, dst_pd: usize) {
        self.edges.push(Edge {
            src_node,
            src_pd,
            dst_node,
            dst_pd,
        });
    }

    pub fn set_input(&mut self, node: NodeId, pd: usize) {
        self.input_endpoint = Some((node, pd));
    }

    pub fn set_output(&mut self, node: NodeId, pd: usize) {
        self.output_endpoint = Some((node, pd));
    }

    /// Runs topology check, type inference, and shadow resolution
    /// (spec.md §4.4 steps 1–3) and produces the frozen graph.
    pub fn freeze(self, resolver: &dyn TypeResolver) -> Result<ServiceGraph> {
        let input_endpoint = self.input_endpoint.ok_or_else(|| {
            GraphBuildError::new(codes::GRAPH_DANGLING_INPUT, "no input endpoint set")
        })?;
        let output_endpoint = self.output_endpoint.ok_or_else(|| {
            GraphBuildError::new(codes::GRAPH_DANGLING_INPUT, "no output endpoint set")
        })?;

        check_acyclic(&self.nodes, &self.edges)?;
        check_reachability(&self.nodes, &self.edges, input_endpoint, output_endpoint)?;
        check_types(&self.nodes, &self.edges, resolver)?;
        let shadow_origin = resolve_shadows(&self.nodes)?;

        Ok(ServiceGraph {
            nodes: self.nodes.into_iter().map(|n| n.servlet).collect(),
            edges: self.edges,
            input_endpoint,
            output_endpoint,
            shadow_origin,
        })
    }
}

/// Distinguishes the graph-build failure modes recovered from the original
/// runtime's error taxonomy (`include/sched/type.h`): cycle, unreachable,
/// type-mismatch, dangling-input, dangling-shadow.
pub type GraphBuildError = PlumberError;

fn err(code: &'static str, message: impl Into<String>) -> PlumberError {
    PlumberError::new(code, ErrorCategory::Usage, message.into())
}

impl GraphBuildError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        err(code, message)
    }
}

fn check_acyclic(nodes: &[BufferedNode], edges: &[Edge]) -> Result<()> {
    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    let mut adjacency = vec![Vec::new(); n];
    for edge in edges {
        adjacency[edge.src_node].push(edge.dst_node);
        indegree[edge.dst_node] += 1;
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &next in &adjacency[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }
    if visited != n {
        return Err(err(codes::GRAPH_CYCLE, "service graph contains a cycle"));
    }
    Ok(())
}

fn check_reachability(
    nodes: &[BufferedNode],
    edges: &[Edge],
    input_endpoint: (NodeId, usize),
    output_endpoint: (NodeId, usize),
) -> Result<()> {
    let mut adjacency = vec![Vec::new(); nodes.len()];
    for edge in edges {
        adjacency[edge.src_node].push(edge.dst_node);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([input_endpoint.0]);
    seen.insert(input_endpoint.0);
    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    for id in 0..nodes.len() {
        if !seen.contains(&id) {
            return Err(err(
                codes::GRAPH_UNREACHABLE,
                format!("node {id} is not reachable from the input endpoint"),
            ));
        }
    }
    if !seen.contains(&output_endpoint.0) {
        return Err(err(
            codes::GRAPH_UNREACHABLE,
            "output endpoint is not reached from the input endpoint",
        ));
    }
    Ok(())
}

fn check_types(nodes: &[BufferedNode], edges: &[Edge], resolver: &dyn TypeResolver) -> Result<()> {
    for edge in edges {
        let src_pd = &nodes[edge.src_node].servlet.pipe_descriptors()[edge.src_pd];
        let dst_pd = &nodes[edge.dst_node].servlet.pipe_descriptors()[edge.dst_pd];
        let (Some(src_ty), Some(dst_ty)) = (&src_pd.type_name, &dst_pd.type_name) else {
            continue;
        };
        if !resolver.convertible(src_ty, dst_ty) {
            return Err(err(
                codes::GRAPH_TYPE_MISMATCH,
                format!(
                    "edge {}.{} -> {}.{}: type {src_ty} not convertible to {dst_ty}",
                    edge.src_node, edge.src_pd, edge.dst_node, edge.dst_pd
                ),
            ));
        }
    }
    Ok(())
}

/// For each shadow output PD, binds it to its ultimate origin (resolving a
/// shadow-of-a-shadow chain transitively — see DESIGN.md for the Open
/// Question (a) resolution) and composes inherited flags along the chain
/// (shadow of persist is persist).
fn resolve_shadows(nodes: &[BufferedNode]) -> Result<Vec<Vec<Option<usize>>>> {
    let mut origins = Vec::with_capacity(nodes.len());
    for node in nodes {
        let pds = node.servlet.pipe_descriptors();
        let mut node_origins = vec![None; pds.len()];
        for (pd_index, pd) in pds.iter().enumerate() {
            let Some(mut cursor) = pd.shadow_of else {
                continue;
            };
            let mut visited = HashSet::from([pd_index]);
            loop {
                if !visited.insert(cursor) {
                    return Err(err(
                        codes::GRAPH_DANGLING_SHADOW,
                        "shadow chain forms a cycle",
                    ));
                }
                match pds.get(cursor).and_then(|p| p.shadow_of) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
            if pds.get(cursor).is_none() {
                return Err(err(
                    codes::GRAPH_DANGLING_SHADOW,
                    "shadow origin does not exist",
                ));
            }
            node_origins[pd_index] = Some(cursor);
        }
        origins.push(node_origins);
    }
    Ok(origins)
}

/// A validated, immutable service graph (spec.md §3 "Service graph", §4.4
/// "A frozen service exposes").
pub struct ServiceGraph {
    nodes: Vec<Arc<ServletDescriptor>>,
    edges: Vec<Edge>,
    input_endpoint: (NodeId, usize),
    output_endpoint: (NodeId, usize),
    /// `shadow_origin[node][pd]` is the ultimate non-shadow origin PD, if
    /// `pd` is (possibly transitively) a shadow.
    shadow_origin: Vec<Vec<Option<usize>>>,
}

impl ServiceGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn servlet(&self, node: NodeId) -> &Arc<ServletDescriptor> {
        &self.nodes[node]
    }

    pub fn input_endpoint(&self) -> (NodeId, usize) {
        self.input_endpoint
    }

    pub fn output_endpoint(&self) -> (NodeId, usize) {
        self.output_endpoint
    }

    pub fn input_endpoint_flags(&self) -> PipeFlags {
        let (node, pd) = self.input_endpoint;
        self.nodes[node].pipe_descriptors()[pd].flags
    }

    pub fn output_endpoint_flags(&self) -> PipeFlags {
        let (node, pd) = self.output_endpoint;
        self.nodes[node].pipe_descriptors()[pd].flags
    }

    /// `iterate_outgoing(node, pd)` (spec.md §4.4): every downstream
    /// `(node, pd)` bound to this output.
    pub fn iterate_outgoing(&self, node: NodeId, pd: usize) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.src_node == node && e.src_pd == pd)
            .map(|e| (e.dst_node, e.dst_pd))
    }

    /// Every node with no inbound edges (spec.md §4.6 "seeds it with init
    /// tasks for all nodes that have no inbound edges").
    pub fn source_nodes(&self) -> Vec<NodeId> {
        let mut has_incoming = vec![false; self.nodes.len()];
        for edge in &self.edges {
            has_incoming[edge.dst_node] = true;
        }
        (0..self.nodes.len())
            .filter(|&n| !has_incoming[n])
            .collect()
    }

    /// Node IDs whose every non-shadow input PD has an incoming edge
    /// (used by the step loop's `all_inputs_ready`, spec.md §4.5).
    pub fn inputs_for(&self, node: NodeId) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.dst_node == node)
            .map(|e| (e.src_node, e.src_pd))
    }

    pub fn shadow_origin_of(&self, node: NodeId, pd: usize) -> Option<usize> {
        self.shadow_origin[node][pd]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::descriptor::{Direction, PipeDescriptor};
    use crate::servlet::{Action, ExecOutcome, Servlet, ServletDescriptor};
    use crate::task::TaskContext;

    struct Stub(Vec<PipeDescriptor>);
    impl Servlet for Stub {
        fn description(&self) -> &str {
            "stub"
        }
        fn pipe_descriptors(&self) -> &[PipeDescriptor] {
            &self.0
        }
        fn exec(&self, _ctx: &mut TaskContext<'_>) -> Result<ExecOutcome> {
            Ok(ExecOutcome::Done)
        }
    }

    fn servlet(pds: Vec<PipeDescriptor>) -> Arc<ServletDescriptor> {
        Arc::new(ServletDescriptor::new("stub", Arc::new(Stub(pds))))
    }

    #[test]
    fn two_node_chain_freezes() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(servlet(vec![PipeDescriptor::new("out", Direction::Output)]));
        let c = b.add_node(servlet(vec![PipeDescriptor::new("in", Direction::Input)]));
        b.add_edge(a, 0, c, 0);
        b.set_input(a, 0);
        b.set_output(c, 0);
        let graph = b.freeze(&ExactMatchResolver).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.source_nodes(), vec![a]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(servlet(vec![
            PipeDescriptor::new("in", Direction::Input),
            PipeDescriptor::new("out", Direction::Output),
        ]));
        let c = b.add_node(servlet(vec![
            PipeDescriptor::new("in", Direction::Input),
            PipeDescriptor::new("out", Direction::Output),
        ]));
        b.add_edge(a, 1, c, 0);
        b.add_edge(c, 1, a, 0);
        b.set_input(a, 0);
        b.set_output(c, 1);
        let err = b.freeze(&ExactMatchResolver).unwrap_err();
        assert_eq!(err.code(), codes::GRAPH_CYCLE);
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(servlet(vec![PipeDescriptor::new("out", Direction::Output)]));
        let _orphan = b.add_node(servlet(vec![PipeDescriptor::new("in", Direction::Input)]));
        b.set_input(a, 0);
        b.set_output(a, 0);
        let err = b.freeze(&ExactMatchResolver).unwrap_err();
        assert_eq!(err.code(), codes::GRAPH_UNREACHABLE);
    }

    #[test]
    fn shadow_of_shadow_resolves_to_ultimate_origin() {
        let pds = vec![
            PipeDescriptor::new("base", Direction::Output).with_flags(PipeFlags::PERSIST),
            PipeDescriptor::new("mid_shadow", Direction::Output).shadow_of(0),
            PipeDescriptor::new("leaf_shadow", Direction::Output).shadow_of(1),
        ];
        let mut b = GraphBuilder::new();
        let a = b.add_node(servlet(pds));
        let c = b.add_node(servlet(vec![PipeDescriptor::new("in", Direction::Input)]));
        b.add_edge(a, 0, c, 0);
        b.set_input(a, 0);
        b.set_output(a, 2);
        let graph = b.freeze(&ExactMatchResolver).unwrap();
        assert_eq!(graph.shadow_origin_of(a, 2), Some(0));
    }
}
