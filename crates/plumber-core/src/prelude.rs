//! Convenience re-exports for servlet and transport implementors.

pub use crate::error::{codes, ErrorCategory, PlumberError, Result};
pub use crate::graph::{Edge, ExactMatchResolver, GraphBuilder, ServiceGraph, TypeResolver};
pub use crate::module::{Module, ModuleRegistry, ModuleVTable, NamedModule};
pub use crate::pipe::{Direction, MemPipe, PipeDescriptor, PipeFlags, PipeHandle, PushedState, WriteOutcome};
pub use crate::rls::{Rls, ScopeEntity, ScopeToken, StreamHandle, StreamReadOutcome};
pub use crate::scheduler::{AsyncOffloadPool, Equeue, Scheduler, SchedulerConfig};
pub use crate::servlet::{Action, ExecOutcome, Servlet, ServletDescriptor, ServletFactory};
pub use crate::task::{NodeId, Task, TaskContext};
