//! Fixed-size thread pool running the step loop over scheduler state
//! (spec.md §2 "Worker pool", §4.2, §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::graph::ServiceGraph;
use crate::servlet::Action;
use crate::task::{AsyncHandle, NodeId, TaskContext};

use super::async_offload::AsyncOffloadPool;
use super::equeue::{Equeue, Event, IoEvent, TaskCompletion};
use super::rsc::Rsc;
use super::step::{build_task, finish_exec, step, StepOutcome};

pub type RscTable = Arc<Mutex<HashMap<u64, Rsc>>>;

/// Drives a freshly-created request (from an `IoEvent`) to either
/// completion or first suspension.
fn seed_and_drive(graph: Arc<ServiceGraph>, event: IoEvent, next_id: &AtomicU64, async_pool: &Arc<AsyncOffloadPool>, equeue: &Equeue) -> Option<Rsc> {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    let mut rsc = Rsc::new(id, graph);

    let (in_node, in_pd) = rsc.graph.input_endpoint();
    let (out_node, out_pd) = rsc.graph.output_endpoint();
    rsc.bind_external_input(in_node, in_pd, event.input);
    rsc.bind_external_output(out_node, out_pd, event.output);

    for node in rsc.graph.clone().source_nodes() {
        let init_task = build_task(&mut rsc, node, Action::Init);
        rsc.enqueue(init_task);
        let exec_task = build_task(&mut rsc, node, Action::Exec);
        rsc.enqueue(exec_task);
    }

    drive(&mut rsc, async_pool, equeue);
    if rsc.is_done() {
        None
    } else {
        Some(rsc)
    }
}

/// Steps `rsc` until it is idle (complete) or suspended on outstanding
/// async work (spec.md §4.2 "the worker releases the RSC ... and returns
/// to the pool").
fn drive(rsc: &mut Rsc, async_pool: &Arc<AsyncOffloadPool>, equeue: &Equeue) {
    loop {
        match step(rsc, async_pool, equeue) {
            StepOutcome::Progressed => {
                if rsc.ready_len() == 0 {
                    // Either fully done, or would-block on outstanding
                    // async work; either way the worker is free to return.
                    return;
                }
            }
            StepOutcome::Idle => return,
            StepOutcome::Fatal(e) => {
                warn!(error = %e, rsc = rsc.id, "request aborted");
                return;
            }
        }
    }
}

fn handle_completion(
    rscs: &RscTable,
    completion: TaskCompletion,
    async_pool: &Arc<AsyncOffloadPool>,
    equeue: &Equeue,
) {
    let mut table = rscs.lock();
    let Some(rsc) = table.get_mut(&completion.rsc_id) else {
        debug!(rsc = completion.rsc_id, "completion for unknown/finished request");
        return;
    };
    rsc.mark_async_complete();
    if rsc.is_cancelled() {
        table.remove(&completion.rsc_id);
        return;
    }
    if let Some(mut task) = rsc.resume_parked(completion.node) {
        let node = completion.node;
        let servlet = rsc.graph.servlet(node).servlet().clone();
        let handle = AsyncHandle {
            pool: Arc::clone(async_pool),
            equeue: equeue.clone(),
            rsc_id: completion.rsc_id,
            node,
        };
        let result = crate::task::with_current_task(node, || {
            let mut ctx = TaskContext::new(&mut task, &mut rsc.rls).with_async(handle);
            servlet.on_async_complete(&mut ctx, completion.result)
        });
        match result {
            Ok(crate::servlet::ExecOutcome::Done) => finish_exec(rsc, node, &servlet, &mut task),
            Ok(crate::servlet::ExecOutcome::Suspended) => {
                rsc.mark_suspended();
                rsc.park_task(node, task);
            }
            Err(e) => {
                warn!(error = %e, rsc = completion.rsc_id, "async completion failed");
                rsc.cancel();
            }
        }
    }
    drive(rsc, async_pool, equeue);
    if rsc.is_done() {
        table.remove(&completion.rsc_id);
    }
}

/// Spawns one worker thread draining the equeue (spec.md §2 "Worker
/// pool"). Workers share the equeue and the in-flight RSC table; each
/// owns the RSCs it is actively stepping.
pub fn spawn(
    index: usize,
    equeue: Equeue,
    graph: Arc<ServiceGraph>,
    rscs: RscTable,
    async_pool: Arc<AsyncOffloadPool>,
    next_id: Arc<AtomicU64>,
    killed: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("plumber-worker-{index}"))
        .spawn(move || {
            while !killed.load(Ordering::Acquire) {
                let Some(event) = equeue.pop_timeout(Duration::from_millis(100)) else {
                    continue;
                };
                match event {
                    Event::Io(io_event) => {
                        if let Some(parked) = seed_and_drive(Arc::clone(&graph), io_event, &next_id, &async_pool, &equeue) {
                            rscs.lock().insert(parked.id, parked);
                        }
                    }
                    Event::Completion(completion) => {
                        handle_completion(&rscs, completion, &async_pool, &equeue);
                    }
                }
            }
        })
        .expect("spawn worker thread")
}
