//! The step loop (spec.md §4.5), transcribed from the pseudocode: pop a
//! ready task, run its action, on success flush and finalise its outputs,
//! then seed any downstream node whose inputs are now all satisfied.

use std::sync::Arc;

use crate::error::PlumberError;
use crate::servlet::{Action, ExecOutcome};
use crate::task::{AsyncHandle, NodeId, Task, TaskContext};

use super::async_offload::AsyncOffloadPool;
use super::equeue::Equeue;
use super::rsc::Rsc;

/// Return codes mirroring spec.md §4.5: `>0` progressed, `0` idle
/// (request complete or suspended), `<0` fatal.
pub enum StepOutcome {
    Progressed,
    Idle,
    Fatal(PlumberError),
}

/// Builds a task for `node`/`action`. Only `Exec` tasks bind pipes (spec.md
/// §4.2 "flexible array" pipe table): `init`/`unload` run once per
/// connection for bookkeeping (pushed state, resource teardown) and do
/// not themselves move bytes, so pipe handles stay owned by the eventual
/// exec task rather than being split across three short-lived tasks per
/// node.
pub fn build_task(rsc: &mut Rsc, node: NodeId, action: Action) -> Task {
    let servlet = rsc.graph.servlet(node).servlet().clone();
    let pds = servlet.pipe_descriptors();
    let mut task = Task::new(node, action, pds.len());
    if action == Action::Exec {
        for (pd, descriptor) in pds.iter().enumerate() {
            if descriptor.is_output() {
                task.bind_pipe(pd, rsc.take_output(node, pd));
            } else if let Some(handle) = rsc.take_input(node, pd) {
                task.bind_pipe(pd, handle);
            }
        }
    }
    task
}

/// Runs one iteration of the step loop over `rsc` (spec.md §4.5).
pub fn step(rsc: &mut Rsc, async_pool: &Arc<AsyncOffloadPool>, equeue: &Equeue) -> StepOutcome {
    let Some(mut task) = rsc.pop_ready() else {
        return if rsc.is_done() {
            StepOutcome::Idle
        } else {
            StepOutcome::Idle // would-block: outstanding async, nothing ready
        };
    };

    let node = task.node;
    let action = task.action;
    let servlet = rsc.graph.servlet(node).servlet().clone();
    let handle = AsyncHandle {
        pool: Arc::clone(async_pool),
        equeue: equeue.clone(),
        rsc_id: rsc.id,
        node,
    };

    let result = crate::task::with_current_task(node, || {
        let mut ctx = TaskContext::new(&mut task, &mut rsc.rls).with_async(handle);
        match action {
            Action::Init => servlet.init(&mut ctx).map(|_| ExecOutcome::Done),
            Action::Exec => servlet.exec(&mut ctx),
            Action::Unload => servlet.unload(&mut ctx).map(|_| ExecOutcome::Done),
        }
    });

    match result {
        Err(e) => {
            if action == Action::Exec {
                run_cancellation(rsc);
            }
            return StepOutcome::Fatal(e);
        }
        Ok(ExecOutcome::Suspended) => {
            rsc.mark_suspended();
            rsc.park_task(node, task);
            return StepOutcome::Progressed;
        }
        Ok(ExecOutcome::Done) => {}
    }

    match action {
        Action::Init => rsc.mark_init_ran(node),
        Action::Exec => finish_exec(rsc, node, &servlet, &mut task),
        Action::Unload => {}
    }

    StepOutcome::Progressed
}

/// Runs the post-`exec` half of the step loop (spec.md §4.5 steps 4–5):
/// flush and finalise outputs, mark the node's exec as having run, then
/// seed downstream tasks. Shared between the ordinary step path and async
/// completion re-entry (spec.md §4.7), since both end the same way once
/// the servlet has produced its outputs.
pub(super) fn finish_exec(
    rsc: &mut Rsc,
    node: NodeId,
    servlet: &std::sync::Arc<dyn crate::servlet::Servlet>,
    task: &mut Task,
) {
    for (pd, descriptor) in servlet.pipe_descriptors().iter().enumerate() {
        if descriptor.is_output() {
            if let Some(handle) = task.pipe_mut(pd) {
                handle.finalize();
            }
        }
    }
    rsc.mark_exec_ran(node);
    seed_successors(rsc, node, servlet);
}

/// Walks `node`'s outgoing edges; for each destination whose inputs are
/// now all satisfied, enqueues an already-wired `Exec` task (spec.md §4.5
/// step 4). Pipe wiring itself happened up front in [`Rsc::new`]; this
/// only decides readiness and builds the task. A non-source node's `init`
/// is not part of the upfront seeding (only nodes with no inbound edges
/// get that, spec.md §4.6); instead it runs here, once, the first time the
/// node becomes ready, immediately ahead of its first `Exec`.
fn seed_successors(rsc: &mut Rsc, node: NodeId, servlet: &std::sync::Arc<dyn crate::servlet::Servlet>) {
    let graph = rsc.graph.clone();
    let mut to_enqueue = Vec::new();
    for (pd, descriptor) in servlet.pipe_descriptors().iter().enumerate() {
        if !descriptor.is_output() {
            continue;
        }
        for (dst_node, _dst_pd) in graph.iterate_outgoing(node, pd) {
            let dst_servlet = graph.servlet(dst_node).servlet().clone();
            let total_inputs = dst_servlet
                .pipe_descriptors()
                .iter()
                .filter(|pd| pd.is_input())
                .count()
                .max(1) as u32;
            if rsc.note_input_ready(dst_node, total_inputs) && !to_enqueue.contains(&dst_node) {
                to_enqueue.push(dst_node);
            }
        }
    }
    for dst_node in to_enqueue {
        if !rsc.init_ran(dst_node) {
            rsc.enqueue(build_task(rsc, dst_node, Action::Init));
        }
        let task = build_task(rsc, dst_node, Action::Exec);
        rsc.enqueue(task);
    }
}

fn run_cancellation(rsc: &mut Rsc) {
    rsc.cancel();
    for unload in rsc.drain_to_cancel_path() {
        rsc.enqueue(unload);
    }
    rsc.close_all_pending();
}
