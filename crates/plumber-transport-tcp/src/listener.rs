//! Blocking `std::net` TCP transport module (spec.md §4.6 "event thread").
//!
//! Grounded on the teacher's listener/channel split
//! (`spark-transport-tcp/src/listener.rs`, `channel.rs`), reworked against
//! `std::net` instead of Tokio: Plumber's event threads are plain blocking
//! OS threads, one per event-producing module (spec.md §4.6), so there is
//! no async runtime for the teacher's `CallContext`-aware cancellation to
//! hook into. See DESIGN.md for the std-only deviation.

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use plumber_core::error::{codes, ErrorCategory, PlumberError, Result};
use plumber_core::module::{Module, ModuleVTable, NamedModule};

fn map_io_error(err: io::Error) -> PlumberError {
    PlumberError::new(codes::PIPE_IO_ERROR, ErrorCategory::ModuleIo, err.to_string())
        .with_cause(err)
}

/// Per-pipe-handle state: one cloned socket descriptor. Input and output
/// handles on the same connection each own an independent `TcpStream`
/// (via `try_clone`), so reads on one side never contend with writes on
/// the other.
pub struct TcpEnd {
    stream: TcpStream,
    eof: bool,
}

struct TcpVTable {
    listener: TcpListener,
}

impl ModuleVTable for TcpVTable {
    fn read(&self, state: &mut dyn Any, buf: &mut [u8]) -> Result<usize> {
        let end = state.downcast_mut::<TcpEnd>().expect("tcp pipe state");
        match end.stream.read(buf) {
            Ok(0) => {
                end.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => Err(map_io_error(e)),
        }
    }

    fn write(&self, state: &mut dyn Any, buf: &[u8]) -> Result<usize> {
        let end = state.downcast_mut::<TcpEnd>().expect("tcp pipe state");
        end.stream.write(buf).map_err(map_io_error)
    }

    fn has_unread_data(&self, _state: &dyn Any) -> bool {
        // No portable non-blocking peek on a std::net socket; readiness is
        // advisory for this module, the step loop just calls read().
        false
    }

    fn eof(&self, state: &dyn Any) -> bool {
        state.downcast_ref::<TcpEnd>().expect("tcp pipe state").eof
    }

    fn accept_event(&self) -> Result<(Box<dyn Any + Send>, Box<dyn Any + Send>)> {
        let (stream, peer) = self.listener.accept().map_err(map_io_error)?;
        stream.set_nodelay(true).map_err(map_io_error)?;
        let output_stream = stream.try_clone().map_err(map_io_error)?;
        tracing::debug!(%peer, "tcp: accepted connection");
        let input: Box<dyn Any + Send> = Box::new(TcpEnd { stream, eof: false });
        let output: Box<dyn Any + Send> = Box::new(TcpEnd {
            stream: output_stream,
            eof: false,
        });
        Ok((input, output))
    }

    fn event_thread_killed(&self) {
        tracing::debug!("tcp: event thread stopping");
    }
}

/// Binds a listener and registers it as a [`Module`] under `path` (spec.md
/// §4.1, §6). The event thread spawned over the returned module blocks in
/// `accept_event`/`TcpListener::accept` — it only notices a kill request
/// once the next connection arrives, same limitation the original
/// runtime's listener threads have (spec.md §5 "Module `accept_event`
/// respects the thread-killed flag").
pub fn bind(path: impl Into<Box<str>>, addr: SocketAddr) -> Result<(Arc<dyn Module>, SocketAddr)> {
    let listener = TcpListener::bind(addr).map_err(map_io_error)?;
    let local_addr = listener.local_addr().map_err(map_io_error)?;
    let module: Arc<dyn Module> = Arc::new(NamedModule::new(path, TcpVTable { listener }));
    Ok((module, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn accept_event_hands_off_connected_streams() {
        let (module, addr) = bind("pipe.tcp.test", "127.0.0.1:0".parse().unwrap()).unwrap();
        let module_for_thread = Arc::clone(&module);
        let accepted = std::thread::spawn(move || module_for_thread.accept_event());
        let _client = StdTcpStream::connect(addr).expect("connect to bound listener");
        let (input_state, output_state) = accepted.join().unwrap().unwrap();
        assert!(input_state.downcast_ref::<TcpEnd>().is_some());
        assert!(output_state.downcast_ref::<TcpEnd>().is_some());
    }
}
