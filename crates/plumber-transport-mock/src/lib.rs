//! In-memory event-producing module for exercising a service graph without
//! real sockets (spec.md §8's end-to-end scenarios).
//!
//! Grounded on the original runtime's `module/test` and `module/simulate`
//! built-ins (`include/module/test/module.h`: "set the mocked request" /
//! "get the mocked response"): each call to [`MockModule::push_request`]
//! queues one fixed byte sequence as the next request and hands back a
//! [`ResponseHandle`] the caller reads once the scheduler has driven it to
//! completion.

use std::any::Any;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use plumber_core::error::Result;
use plumber_core::module::{Module, ModuleVTable, NamedModule};

/// A captured response buffer, shared with the pipe handle the scheduler
/// writes into. Cheap to poll: the servlet graph runs entirely on worker
/// threads, so tests just spin on [`ResponseHandle::snapshot`] with a short
/// sleep, or wait on [`ResponseHandle::closed`] once the owning output pipe
/// has been finalised.
#[derive(Clone)]
pub struct ResponseHandle {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl ResponseHandle {
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}

struct MockInput {
    data: Vec<u8>,
    cursor: usize,
}

struct MockOutput {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

struct MockVTable {
    request_rx: Receiver<Vec<u8>>,
    response_rx: Receiver<ResponseHandle>,
}

impl ModuleVTable for MockVTable {
    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize> {
        let input = state.downcast_mut::<MockInput>().expect("mock input state");
        let remaining = &input.data[input.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        input.cursor += n;
        Ok(n)
    }

    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize> {
        let output = state.downcast_mut::<MockOutput>().expect("mock output state");
        output.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn has_unread_data(&self, state: &dyn Any) -> bool {
        match state.downcast_ref::<MockInput>() {
            Some(input) => input.cursor < input.data.len(),
            None => false,
        }
    }

    fn eof(&self, state: &dyn Any) -> bool {
        match state.downcast_ref::<MockInput>() {
            Some(input) => input.cursor >= input.data.len(),
            None => false,
        }
    }

    fn finalize(&self, state: &mut dyn Any) {
        if let Some(output) = state.downcast_mut::<MockOutput>() {
            output.closed.store(true, std::sync::atomic::Ordering::Release);
        }
    }

    fn accept_event(&self) -> Result<(Box<dyn Any + Send>, Box<dyn Any + Send>)> {
        let data = self.request_rx.recv().map_err(|_| {
            plumber_core::error::PlumberError::new(
                plumber_core::error::codes::USAGE_INVALID_ARGUMENT,
                plumber_core::error::ErrorCategory::Usage,
                "mock module request queue closed",
            )
        })?;
        let response = self.response_rx.recv().expect("response queued alongside request");
        let input: Box<dyn Any + Send> = Box::new(MockInput { data, cursor: 0 });
        let output: Box<dyn Any + Send> = Box::new(MockOutput {
            buf: response.buf,
            closed: response.closed,
        });
        Ok((input, output))
    }
}

/// Handle used to feed fixed requests into a [`Module`] registered from
/// [`new`]. Dropping every clone closes the request queue, which makes the
/// module's `accept_event` return an error and its event thread exit.
pub struct MockFeeder {
    request_tx: Sender<Vec<u8>>,
    response_tx: Sender<ResponseHandle>,
}

impl MockFeeder {
    /// Queues `data` as the next request this module's event thread will
    /// hand to the scheduler, and returns a handle for reading back
    /// whatever the graph writes to the matching output pipe.
    pub fn push_request(&self, data: impl Into<Vec<u8>>) -> ResponseHandle {
        let handle = ResponseHandle {
            buf: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        self.request_tx.send(data.into()).expect("request queue open");
        self.response_tx
            .send(handle.clone())
            .expect("response queue open");
        handle
    }
}

/// Registers a fresh mock module under `path` and returns the feeder used
/// to drive it from test code.
pub fn new(path: impl Into<Box<str>>) -> (Arc<dyn Module>, MockFeeder) {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (response_tx, response_rx) = crossbeam_channel::unbounded();
    let module: Arc<dyn Module> = Arc::new(NamedModule::new(
        path,
        MockVTable {
            request_rx,
            response_rx,
        },
    ));
    (
        module,
        MockFeeder {
            request_tx,
            response_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_event_pairs_request_with_its_response_handle() {
        let (module, feeder) = new("pipe.mock.test");
        let response = feeder.push_request(b"hello".to_vec());

        let (input_state, output_state) = module.accept_event().unwrap();
        let mut input = input_state;
        let mut buf = [0u8; 5];
        assert_eq!(module.read(&mut *input, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(module.eof(&*input));

        let mut output = output_state;
        module.write(&mut *output, b"world").unwrap();
        assert_eq!(response.snapshot(), b"world");

        module.finalize(&mut *output);
        assert!(response.is_closed());
    }
}
