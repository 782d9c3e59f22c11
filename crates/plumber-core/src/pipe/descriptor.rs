//! Pipe descriptor (PD): a compile-time index within a servlet (spec.md §3).

use std::sync::Arc;

/// Direction of a declared pipe descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Flag contract from spec.md §4.1. A small hand-rolled bitset rather than a
/// macro-generated one: the flag set is fixed and tiny, so a crate dependency
/// would buy nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipeFlags(u8);

impl PipeFlags {
    /// The pipe survives this task invocation; a subsequent request on the
    /// same connection re-enters the servlet with the pushed state.
    pub const PERSIST: PipeFlags = PipeFlags(0b0001);
    /// Writes may be buffered; the servlet may return before bytes hit the wire.
    pub const ASYNC: PipeFlags = PipeFlags(0b0010);
    /// This output is an alias for another; writes go to the origin.
    pub const SHADOW: PipeFlags = PipeFlags(0b0100);
    /// The pipe is muted: reads return EOF, writes are discarded.
    pub const DISABLED: PipeFlags = PipeFlags(0b1000);

    pub const fn empty() -> Self {
        PipeFlags(0)
    }

    pub fn contains(self, other: PipeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PipeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PipeFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for PipeFlags {
    type Output = PipeFlags;
    fn bitor(self, rhs: PipeFlags) -> PipeFlags {
        PipeFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PipeFlags {
    fn bitor_assign(&mut self, rhs: PipeFlags) {
        self.0 |= rhs.0;
    }
}

/// A servlet-local pipe descriptor, as produced by `pipe_define` (spec.md §6).
#[derive(Debug, Clone)]
pub struct PipeDescriptor {
    pub name: Arc<str>,
    pub direction: Direction,
    pub type_name: Option<Arc<str>>,
    pub flags: PipeFlags,
    /// If this output is a shadow, the PD index of the origin output.
    pub shadow_of: Option<usize>,
}

impl PipeDescriptor {
    pub fn new(name: impl Into<Arc<str>>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            type_name: None,
            flags: PipeFlags::empty(),
            shadow_of: None,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<Arc<str>>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_flags(mut self, flags: PipeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn shadow_of(mut self, origin_pd: usize) -> Self {
        self.shadow_of = Some(origin_pd);
        self.flags |= PipeFlags::SHADOW;
        self
    }

    pub fn is_input(&self) -> bool {
        matches!(self.direction, Direction::Input)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.direction, Direction::Output)
    }
}
