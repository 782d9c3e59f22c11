//! Dedicated thread pool for async-offloaded servlet work (spec.md §4.7).
//!
//! A servlet's `setup`/`exec` phases run here, off the worker pool; the
//! worker that originally stepped the suspended task is freed immediately
//! (spec.md §5 "Workers never block inside a servlet's exec"). The
//! `cleanup` phase runs back on a worker, inline with the step loop, once
//! the corresponding `TaskCompletion` event is drained from the equeue.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct AsyncOffloadPool {
    tx: mpsc::Sender<Job>,
    _workers: Vec<JoinHandle<()>>,
}

impl AsyncOffloadPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = std::sync::Arc::new(parking_lot::Mutex::new(rx));
        let workers = (0..size.max(1))
            .map(|index| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("plumber-async-offload-{index}"))
                    .spawn(move || loop {
                        let job = {
                            let rx = rx.lock();
                            rx.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("spawn async offload worker")
            })
            .collect();
        Self {
            tx,
            _workers: workers,
        }
    }

    /// Submits the `setup`+`exec` phases of an async task. The closure is
    /// responsible for posting its own `TaskCompletion` (see
    /// `TaskContext::spawn_async`).
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn submitted_job_runs_on_a_pool_thread() {
        let pool = AsyncOffloadPool::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        pool.submit(move || flag.store(true, Ordering::SeqCst));
        for _ in 0..100 {
            if ran.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("async job did not run within timeout");
    }
}
