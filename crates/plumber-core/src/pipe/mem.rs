//! Built-in memory-backed module for intra-graph edges (spec.md §4.1
//! "allocation for an intra-graph edge (memory-backed)"). Grounded on the
//! original runtime's `mem_pipe` built-in (`include/module/builtins.h`).

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::module::{Module, ModuleVTable, NamedModule};
use crate::pipe::handle::PipeHandle;

const PATH: &str = "pipe.mem";

/// One end of a memory-backed pipe. The writer and every reader derived
/// from it via [`MemPipe::additional_reader`] share `buf`; `cursor` is
/// meaningful only on reader ends. `closed` is set by `flush_and_finalise`
/// once the writer's task has returned, so readers observe EOF exactly
/// when they have drained everything written — this is also how a shadow
/// pipe (another reader on the same origin writer) and graph fan-out
/// (multiple edges from one output PD) are both represented: as
/// additional readers on one writer.
struct MemEnd {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    cursor: usize,
}

struct MemVTable;

impl ModuleVTable for MemVTable {
    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize> {
        let s = state.downcast_mut::<MemEnd>().expect("mem pipe state");
        let source = s.buf.lock();
        let remaining = &source[s.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        drop(source);
        s.cursor += n;
        Ok(n)
    }

    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize> {
        let s = state.downcast_mut::<MemEnd>().expect("mem pipe state");
        s.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn has_unread_data(&self, state: &dyn Any) -> bool {
        let s = state.downcast_ref::<MemEnd>().expect("mem pipe state");
        s.buf.lock().len() > s.cursor
    }

    fn eof(&self, state: &dyn Any) -> bool {
        let s = state.downcast_ref::<MemEnd>().expect("mem pipe state");
        s.closed.load(Ordering::Acquire) && s.buf.lock().len() <= s.cursor
    }

    fn finalize(&self, state: &mut dyn Any) {
        let s = state.downcast_mut::<MemEnd>().expect("mem pipe state");
        s.closed.store(true, Ordering::Release);
    }
}

/// Factory for memory-backed pipe ends.
pub struct MemPipe;

impl MemPipe {
    /// Allocates a fresh writer end with an empty, unshared buffer.
    pub fn allocate_writer() -> PipeHandle {
        let module: Arc<dyn Module> = Arc::new(NamedModule::new(PATH, MemVTable));
        PipeHandle::new(
            module,
            Box::new(MemEnd {
                buf: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                cursor: 0,
            }),
        )
    }

    /// Derives a new, independently-positioned reader over the same
    /// underlying buffer as `writer` (or another reader). Returns `None`
    /// if `writer` is not a memory-backed handle.
    pub fn additional_reader(writer: &PipeHandle) -> Option<PipeHandle> {
        let end = writer.state_ref::<MemEnd>()?;
        Some(PipeHandle::new(
            Arc::clone(writer.module()),
            Box::new(MemEnd {
                buf: Arc::clone(&end.buf),
                closed: Arc::clone(&end.closed),
                cursor: 0,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_finalize_then_read_observes_eof() {
        let mut writer = MemPipe::allocate_writer();
        let mut reader = MemPipe::additional_reader(&writer).unwrap();
        writer.write(b"hello");
        writer.finalize();
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(reader.eof());
    }

    #[test]
    fn reader_sees_no_eof_before_writer_finalizes() {
        let mut writer = MemPipe::allocate_writer();
        let reader = MemPipe::additional_reader(&writer).unwrap();
        writer.write(b"partial");
        assert!(!reader.eof());
    }

    #[test]
    fn two_readers_on_one_writer_each_see_all_bytes() {
        let mut writer = MemPipe::allocate_writer();
        let mut a = MemPipe::additional_reader(&writer).unwrap();
        let mut b = MemPipe::additional_reader(&writer).unwrap();
        writer.write(b"fanout");
        writer.finalize();
        let mut buf_a = [0u8; 6];
        let mut buf_b = [0u8; 6];
        assert_eq!(a.read(&mut buf_a).unwrap(), 6);
        assert_eq!(b.read(&mut buf_b).unwrap(), 6);
        assert_eq!(&buf_a, b"fanout");
        assert_eq!(&buf_b, b"fanout");
    }
}
