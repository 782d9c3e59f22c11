//! Request scheduler context: per-request state driving a graph to
//! completion (spec.md §3 "RSC", §4.2).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::graph::ServiceGraph;
use crate::pipe::{MemPipe, PipeFlags, PipeHandle};
use crate::rls::Rls;
use crate::servlet::Action;
use crate::task::{NodeId, Task};

/// Readiness bookkeeping for one node within one request.
#[derive(Debug, Default, Clone, Copy)]
struct NodeState {
    init_ran: bool,
    exec_ran: bool,
    satisfied_inputs: u32,
}

/// Per-request state (spec.md §3 "RSC"): the ready queue of runnable
/// tasks, outstanding-async count, completion map, a pointer to the
/// request's RLS, and a cancellation flag.
///
/// Intra-graph pipe wiring is resolved once, up front, from the frozen
/// graph's edges rather than allocated lazily inside the step loop: every
/// origin output PD that feeds at least one edge gets one memory-backed
/// writer, every destination input PD gets an independent reader derived
/// from that writer (spec.md §4.1), and a shadow output PD is bound to an
/// additional reader/writer alias of its origin so writes through the
/// shadow land in the same buffer (spec.md §4.4 "Shadow resolution").
pub struct Rsc {
    pub id: u64,
    pub graph: Arc<ServiceGraph>,
    pub rls: Rls,
    ready: VecDeque<Task>,
    outstanding_async: usize,
    completion: HashMap<NodeId, NodeState>,
    cancelled: bool,
    pending_outputs: HashMap<(NodeId, usize), PipeHandle>,
    pending_inputs: HashMap<(NodeId, usize), PipeHandle>,
    suspended: HashMap<NodeId, Task>,
}

impl Rsc {
    pub fn new(id: u64, graph: Arc<ServiceGraph>) -> Self {
        let (pending_outputs, pending_inputs) = prewire(&graph);
        Self {
            id,
            graph,
            rls: Rls::new(),
            ready: VecDeque::new(),
            outstanding_async: 0,
            completion: HashMap::new(),
            cancelled: false,
            pending_outputs,
            pending_inputs,
            suspended: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, task: Task) {
        self.ready.push_back(task);
    }

    pub fn pop_ready(&mut self) -> Option<Task> {
        self.ready.pop_front()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn outstanding_async(&self) -> usize {
        self.outstanding_async
    }

    pub fn mark_suspended(&mut self) {
        self.outstanding_async += 1;
    }

    pub fn mark_async_complete(&mut self) {
        self.outstanding_async = self.outstanding_async.saturating_sub(1);
    }

    pub fn is_done(&self) -> bool {
        self.ready.is_empty() && self.outstanding_async == 0
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn mark_init_ran(&mut self, node: NodeId) {
        self.completion.entry(node).or_default().init_ran = true;
    }

    pub fn init_ran(&self, node: NodeId) -> bool {
        self.completion.get(&node).is_some_and(|s| s.init_ran)
    }

    pub fn mark_exec_ran(&mut self, node: NodeId) {
        self.completion.entry(node).or_default().exec_ran = true;
    }

    pub fn exec_ran(&self, node: NodeId) -> bool {
        self.completion.get(&node).is_some_and(|s| s.exec_ran)
    }

    /// Records that one of `node`'s input edges is now satisfied, and
    /// reports whether all of its inputs are now ready (`all_inputs_ready`
    /// in the step-loop pseudocode, spec.md §4.5).
    pub fn note_input_ready(&mut self, node: NodeId, total_inputs: u32) -> bool {
        let state = self.completion.entry(node).or_default();
        state.satisfied_inputs += 1;
        state.satisfied_inputs >= total_inputs
    }

    /// Removes and returns the pre-wired writer for `(node, pd)`, if any
    /// edge or shadow alias requires one. Falls back to a throwaway writer
    /// for a "dead" output PD with no outgoing edges, so a servlet write
    /// never panics even when nothing downstream reads it.
    pub fn take_output(&mut self, node: NodeId, pd: usize) -> PipeHandle {
        self.pending_outputs
            .remove(&(node, pd))
            .unwrap_or_else(MemPipe::allocate_writer)
    }

    /// Removes and returns the pre-wired reader for `(node, pd)`, if this
    /// input has an inbound edge (the input endpoint's own pipe is bound
    /// separately, from the triggering `IoEvent`).
    pub fn take_input(&mut self, node: NodeId, pd: usize) -> Option<PipeHandle> {
        self.pending_inputs.remove(&(node, pd))
    }

    pub fn bind_external_input(&mut self, node: NodeId, pd: usize, handle: PipeHandle) {
        self.pending_inputs.insert((node, pd), handle);
    }

    pub fn bind_external_output(&mut self, node: NodeId, pd: usize, handle: PipeHandle) {
        self.pending_outputs.insert((node, pd), handle);
    }

    /// Parks a task that suspended on async offload (spec.md §4.7) until
    /// its completion event arrives.
    pub fn park_task(&mut self, node: NodeId, task: Task) {
        self.suspended.insert(node, task);
    }

    pub fn resume_parked(&mut self, node: NodeId) -> Option<Task> {
        self.suspended.remove(&node)
    }

    /// Builds the cancellation path's `Unload` tasks (spec.md §4.5 "Failure
    /// handling", §8 scenario 6: "every node whose init ran has its unload
    /// invoked"). Two groups of nodes need one:
    ///
    /// - Queued siblings: tasks still sitting in the ready queue when the
    ///   failure happened. These unload in queue order — the chosen order
    ///   for contending sibling nodes (spec.md §9 Open Question (b);
    ///   recorded in DESIGN.md). A queued task whose node's `init` never
    ///   ran is simply dropped, not converted.
    /// - Already-settled nodes: the failing node itself, and any node
    ///   upstream of it that already finished its own `exec` — neither is
    ///   sitting in the ready queue by the time the failure is observed,
    ///   but both had `init` run and still owe an `unload`. These follow
    ///   in ascending node-id order, a simple deterministic tiebreak since
    ///   nothing orders them relative to each other.
    pub fn drain_to_cancel_path(&mut self) -> Vec<Task> {
        let mut unloads = Vec::new();
        let mut seen = std::collections::HashSet::new();
        while let Some(task) = self.ready.pop_front() {
            if task.action == Action::Exec && self.init_ran(task.node) && seen.insert(task.node) {
                let pd_count = task.pipe_count();
                unloads.push(Task::new(task.node, Action::Unload, pd_count));
            }
        }
        let mut remaining: Vec<NodeId> = self
            .completion
            .iter()
            .filter(|(node, state)| state.init_ran && !seen.contains(*node))
            .map(|(node, _)| *node)
            .collect();
        remaining.sort_unstable();
        for node in remaining {
            let pd_count = self.graph.servlet(node).pipe_descriptors().len();
            unloads.push(Task::new(node, Action::Unload, pd_count));
        }
        unloads
    }

    /// Closes every pipe handle this request still holds but never handed
    /// to a running task: outputs (including the connection's own response
    /// pipe, if the output-endpoint node was never reached) are finalised
    /// so a downstream reader observes EOF; inputs are disabled so a stray
    /// read reports EOF rather than blocking (spec.md §8 scenario 6,
    /// "the endpoint pipes closed"). A node's own already-bound task pipes
    /// are not touched here — they close with the task itself, since they
    /// carry no separate close protocol beyond `Drop`.
    pub fn close_all_pending(&mut self) {
        for (_, mut handle) in self.pending_outputs.drain() {
            handle.finalize();
        }
        for (_, mut handle) in self.pending_inputs.drain() {
            handle.set_flag(PipeFlags::DISABLED);
        }
    }
}

fn prewire(
    graph: &ServiceGraph,
) -> (
    HashMap<(NodeId, usize), PipeHandle>,
    HashMap<(NodeId, usize), PipeHandle>,
) {
    let mut writers: HashMap<(NodeId, usize), PipeHandle> = HashMap::new();
    let mut inputs: HashMap<(NodeId, usize), PipeHandle> = HashMap::new();

    for edge in graph.edges() {
        let origin_pd = graph
            .shadow_origin_of(edge.src_node, edge.src_pd)
            .unwrap_or(edge.src_pd);
        writers
            .entry((edge.src_node, origin_pd))
            .or_insert_with(MemPipe::allocate_writer);
    }
    for edge in graph.edges() {
        let origin_pd = graph
            .shadow_origin_of(edge.src_node, edge.src_pd)
            .unwrap_or(edge.src_pd);
        let writer = writers
            .get(&(edge.src_node, origin_pd))
            .expect("prewired above");
        let reader = MemPipe::additional_reader(writer).expect("mem pipe state");
        inputs.insert((edge.dst_node, edge.dst_pd), reader);
    }

    let mut shadow_aliases = Vec::new();
    for node in 0..graph.node_count() {
        let servlet = graph.servlet(node);
        for (pd, descriptor) in servlet.pipe_descriptors().iter().enumerate() {
            if !descriptor.is_output() {
                continue;
            }
            if let Some(origin_pd) = graph.shadow_origin_of(node, pd) {
                if origin_pd != pd {
                    if let Some(origin_writer) = writers.get(&(node, origin_pd)) {
                        let alias = MemPipe::additional_reader(origin_writer)
                            .expect("mem pipe state");
                        shadow_aliases.push(((node, pd), alias));
                    }
                }
            }
        }
    }
    for (key, alias) in shadow_aliases {
        writers.insert(key, alias);
    }

    (writers, inputs)
}
