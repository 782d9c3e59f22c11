//! The scheduler: worker pool, event loop, async offload, and the bounded
//! equeue tying them together (spec.md §2, §4.5–§4.7, §5, §6
//! "`scheduler_start`/`scheduler_kill`").

pub mod async_offload;
pub mod equeue;
pub mod event_loop;
pub mod rsc;
pub mod step;
pub mod worker_pool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::ServiceGraph;
use crate::module::Module;

pub use async_offload::AsyncOffloadPool;
pub use equeue::Equeue;
pub use rsc::Rsc;
pub use step::{step, StepOutcome};

/// Tunables for [`Scheduler::start`] (spec.md §5 "Threading model").
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub worker_threads: usize,
    pub async_offload_threads: usize,
    pub equeue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            async_offload_threads: 2,
            equeue_capacity: 1024,
        }
    }
}

/// Owns the worker pool, one event thread per event-producing module, and
/// the async offload pool for a single service graph. `scheduler_start`/
/// `scheduler_kill` (spec.md §6) are [`Scheduler::start`]/[`Scheduler::kill`].
pub struct Scheduler {
    graph: Arc<ServiceGraph>,
    equeue: Equeue,
    async_pool: Arc<AsyncOffloadPool>,
    rscs: worker_pool::RscTable,
    next_rsc_id: Arc<AtomicU64>,
    killed: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
    event_threads: Vec<std::thread::JoinHandle<()>>,
}

impl Scheduler {
    /// `scheduler_start(graph)` (spec.md §6). `event_modules` are the
    /// modules this graph's default service should drain events from
    /// (typically the listener(s) bound to the graph's input endpoint).
    pub fn start(
        graph: Arc<ServiceGraph>,
        event_modules: Vec<Arc<dyn Module>>,
        config: SchedulerConfig,
    ) -> Self {
        let equeue = Equeue::bounded(config.equeue_capacity);
        let async_pool = Arc::new(AsyncOffloadPool::new(config.async_offload_threads));
        let rscs: worker_pool::RscTable = Arc::new(Mutex::new(HashMap::new()));
        let next_rsc_id = Arc::new(AtomicU64::new(1));
        let killed = Arc::new(AtomicBool::new(false));

        let workers = (0..config.worker_threads.max(1))
            .map(|index| {
                worker_pool::spawn(
                    index,
                    equeue.clone(),
                    Arc::clone(&graph),
                    Arc::clone(&rscs),
                    Arc::clone(&async_pool),
                    Arc::clone(&next_rsc_id),
                    Arc::clone(&killed),
                )
            })
            .collect();

        let event_threads = event_modules
            .into_iter()
            .map(|module| event_loop::spawn(module, equeue.clone(), Arc::clone(&killed)))
            .collect();

        tracing::info!(
            workers = config.worker_threads,
            async_threads = config.async_offload_threads,
            "scheduler started"
        );

        Self {
            graph,
            equeue,
            async_pool,
            rscs,
            next_rsc_id,
            killed,
            workers,
            event_threads,
        }
    }

    /// `scheduler_kill(no_error_if_not_started)` (spec.md §6). Sets the
    /// shared kill flag (event threads see it after their current
    /// blocking `accept_event` returns, workers after their current
    /// `pop_timeout`) and joins every thread.
    pub fn kill(mut self, no_error_if_not_started: bool) {
        if self.workers.is_empty() && self.event_threads.is_empty() && !no_error_if_not_started {
            tracing::warn!("scheduler_kill called but scheduler was never started");
        }
        self.killed.store(true, Ordering::Release);
        for handle in self.event_threads.drain(..) {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn in_flight_requests(&self) -> usize {
        self.rscs.lock().len()
    }

    /// Posts one request directly, bypassing any event-producing module —
    /// used by the CLI's synchronous demo path and by tests.
    pub fn submit(&self, module: Arc<dyn Module>, input: crate::pipe::PipeHandle, output: crate::pipe::PipeHandle) {
        self.equeue.push(equeue::Event::Io(equeue::IoEvent {
            module,
            input,
            output,
        }));
    }

    pub fn graph(&self) -> &Arc<ServiceGraph> {
        &self.graph
    }
}
