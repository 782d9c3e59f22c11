//! Module registry and the transport module vtable (spec.md §3, §4.1, §6).
//!
//! Grounded on the teacher's object-safe `DynServerTransport`/`DynTransportFactory`
//! split (`spark-core/src/transport/traits/object.rs`): Plumber only needs the
//! object-safe shape because modules are registered under a dotted path at
//! startup and resolved dynamically, so the teacher's zero-overhead generic
//! twin is not reproduced here (see DESIGN.md).

mod registry;

pub use registry::{ModuleRegistry, RegisterError};

use std::any::Any;

use crate::error::Result;

/// The per-module vtable a transport implementation provides. Flag/push-state
/// bookkeeping and `accept_event`/`allocate`/`deallocate` are owned by
/// [`crate::pipe::handle::PipeHandle`] and the scheduler respectively — they
/// are identical for every module (mirrors `include/itc/itc.h` in the
/// original C source, where the generic pipe struct carries flags and the
/// push/pop stack itself). Only the operations that are genuinely
/// module-specific — byte I/O, side-channel `invoke`, EOF/backlog queries —
/// are part of this trait.
pub trait ModuleVTable: Send + Sync + 'static {
    /// `read(buf, n) -> bytes_consumed`. `0` means would-block, not EOF.
    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize>;

    /// `write(buf, n) -> bytes_written`.
    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize>;

    fn has_unread_data(&self, state: &dyn Any) -> bool;

    fn eof(&self, state: &dyn Any) -> bool;

    /// Module-specific side-channel RPC (the cntl protocol, spec.md §3).
    fn invoke(&self, _state: &mut dyn Any, _opcode: u32, _args: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Blocks until the module has a new request to offer, returning the
    /// paired input/output state for it (spec.md §3 `accept_event`, §4.6
    /// "Each thread calls the module's blocking `accept_event` in a
    /// loop"). Only event-producing modules (a TCP listener, a test
    /// harness feeding fixed input) implement this; intra-graph modules
    /// like the built-in memory pipe never do.
    fn accept_event(&self) -> Result<(Box<dyn Any + Send>, Box<dyn Any + Send>)> {
        Err(crate::error::PlumberError::new(
            crate::error::codes::USAGE_INVALID_ARGUMENT,
            crate::error::ErrorCategory::Usage,
            "module does not produce events",
        ))
    }

    /// Called once, from the event thread, when that thread is being torn
    /// down (spec.md §3 `event_thread_killed`).
    fn event_thread_killed(&self) {}

    /// Called by the step loop once a task's action returns successfully,
    /// for each of its output pipes (`flush_and_finalise`, spec.md §4.5
    /// step 4). Most modules have nothing buffered to flush; the built-in
    /// memory module uses this to mark the shared buffer closed so the
    /// downstream reader observes EOF once it has drained it.
    fn finalize(&self, _state: &mut dyn Any) {}
}

/// A registered module: a dotted path plus its vtable. This is the
/// object-safe handle stored in the [`ModuleRegistry`] and referenced from
/// every [`crate::pipe::handle::PipeHandle`] it creates.
pub trait Module: Send + Sync + 'static {
    fn path(&self) -> &str;
    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize>;
    fn has_unread_data(&self, state: &dyn Any) -> bool;
    fn eof(&self, state: &dyn Any) -> bool;
    fn invoke(&self, state: &mut dyn Any, opcode: u32, args: &[u8]) -> Result<Vec<u8>>;
    fn event_thread_killed(&self);
    fn finalize(&self, state: &mut dyn Any);
    fn accept_event(&self) -> Result<(Box<dyn Any + Send>, Box<dyn Any + Send>)>;
}

/// Adapts a dotted path plus a [`ModuleVTable`] implementation into a
/// [`Module`]. Transport crates implement `ModuleVTable` and register via
/// `NamedModule::new(path, vtable)`.
pub struct NamedModule<V> {
    path: Box<str>,
    vtable: V,
}

impl<V: ModuleVTable> NamedModule<V> {
    pub fn new(path: impl Into<Box<str>>, vtable: V) -> Self {
        Self {
            path: path.into(),
            vtable,
        }
    }
}

impl<V: ModuleVTable> Module for NamedModule<V> {
    fn path(&self) -> &str {
        &self.path
    }

    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize> {
        self.vtable.read(state, buf)
    }

    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize> {
        self.vtable.write(state, buf)
    }

    fn has_unread_data(&self, state: &dyn Any) -> bool {
        self.vtable.has_unread_data(state)
    }

    fn eof(&self, state: &dyn Any) -> bool {
        self.vtable.eof(state)
    }

    fn invoke(&self, state: &mut dyn Any, opcode: u32, args: &[u8]) -> Result<Vec<u8>> {
        self.vtable.invoke(state, opcode, args)
    }

    fn event_thread_killed(&self) {
        self.vtable.event_thread_killed()
    }

    fn finalize(&self, state: &mut dyn Any) {
        self.vtable.finalize(state)
    }

    fn accept_event(&self) -> Result<(Box<dyn Any + Send>, Box<dyn Any + Send>)> {
        self.vtable.accept_event()
    }
}
