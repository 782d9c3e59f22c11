//! Bounded MPMC event queue between event producers and workers (spec.md
//! §3 Glossary "Equeue", §4.6, §4.7, §5 "back-pressure").

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::module::Module;
use crate::pipe::handle::PipeHandle;

/// A paired input/output pipe handle produced by a module's `accept_event`
/// (spec.md §4.1), ready to seed a fresh request.
pub struct IoEvent {
    pub module: Arc<dyn Module>,
    pub input: PipeHandle,
    pub output: PipeHandle,
}

/// Posted by the async offload pool when a suspended task's `exec` phase
/// finishes (spec.md §4.7).
pub struct TaskCompletion {
    pub rsc_id: u64,
    pub node: crate::task::NodeId,
    pub result: crate::error::Result<()>,
}

pub enum Event {
    Io(IoEvent),
    Completion(TaskCompletion),
}

/// Thin wrapper over a bounded `crossbeam-channel`: producers block on
/// `push` when full (spec.md §5 "Shared-resource policy").
#[derive(Clone)]
pub struct Equeue {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Equeue {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Blocks if the queue is full, giving producers back-pressure.
    pub fn push(&self, event: Event) {
        // A closed receiver only happens during process shutdown, once all
        // workers have exited; there is nothing left to back-pressure.
        let _ = self.tx.send(event);
    }

    pub fn pop_blocking(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn pop_timeout(&self, timeout: std::time::Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
