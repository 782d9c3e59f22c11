//! One thread per event-producing module (spec.md §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::module::Module;
use crate::pipe::PipeHandle;

use super::equeue::{Equeue, Event, IoEvent};

/// Spawns the event thread for one module. Each iteration calls the
/// module's blocking `accept_event`; on success it posts an `IoEvent` to
/// the equeue. `killed` is checked after each call so finalisation exits
/// the loop in orderly fashion (spec.md §4.6, §5 "Module `accept_event`
/// respects the thread-killed flag") — realised as a shared flag the
/// spawning `Scheduler` owns, since each event thread already owns its
/// loop exclusively, rather than literal OS thread-local storage.
pub fn spawn(module: Arc<dyn Module>, equeue: Equeue, killed: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    let name = format!("plumber-event-{}", module.path());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            while !killed.load(Ordering::Acquire) {
                match module.accept_event() {
                    Ok((input_state, output_state)) => {
                        let input = PipeHandle::new(Arc::clone(&module), input_state);
                        let output = PipeHandle::new(Arc::clone(&module), output_state);
                        equeue.push(Event::Io(IoEvent {
                            module: Arc::clone(&module),
                            input,
                            output,
                        }));
                    }
                    Err(_) => break,
                }
            }
        })
        .expect("spawn event thread")
}
