//! DRA stream substrate (spec.md §4.1 "DRA", §4.3 "Streams").

/// Returned by `open_stream`; an opaque per-entity stream cursor. Modules
/// that support DRA use this in place of copying bytes through a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle(pub u64);

/// Outcome of a `read_stream` call.
#[derive(Debug)]
pub enum StreamReadOutcome {
    /// `n` bytes copied into the caller's buffer.
    Read(usize),
    /// No data available right now, not EOF; caller should poll
    /// `ready_event` rather than spin.
    WouldBlock,
    Eof,
}
