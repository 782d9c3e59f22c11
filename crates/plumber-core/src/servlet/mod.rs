//! Servlet descriptors and instances (spec.md §3, §6).
//!
//! The original C runtime loads a servlet from a shared-object binary and
//! resolves `init`/`exec`/`unload` through an exported symbol table. Rust
//! trait objects cannot safely cross a `dlopen` ABI boundary without a
//! stable C ABI, so this is realised as a compiled-in factory registry
//! instead (see DESIGN.md, Open Question resolution for "servlet binary
//! loading"): a servlet is any type implementing [`Servlet`], and binaries
//! become `Box<dyn Servlet>` constructors registered by name.

use std::sync::Arc;

use crate::error::Result;
use crate::pipe::descriptor::PipeDescriptor;
use crate::task::TaskContext;

/// The three action kinds a task may run (spec.md §3 "Task").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Init,
    Exec,
    Unload,
}

/// A stateless compute unit with declared pipes and `init/exec/unload`
/// entry points (spec.md Glossary). Implementations are the Rust analogue
/// of a servlet binary's exported function table (spec.md §6).
pub trait Servlet: Send + Sync + 'static {
    /// Human-readable description, mirrors the exported metadata symbol.
    fn description(&self) -> &str;

    /// The PD table this servlet declares, in declaration order. Index in
    /// this slice is the PD used everywhere else (task pipe tables, graph
    /// edges).
    fn pipe_descriptors(&self) -> &[PipeDescriptor];

    /// Runs once when a node referencing this servlet is first scheduled
    /// on a connection (spec.md §4.5).
    fn init(&self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Runs once per request once this node's inputs are satisfied.
    /// Returning `Ok(None)` means the task suspended on async offload
    /// (spec.md §4.7); the scheduler must not finalise outputs until the
    /// matching `TaskCompletion` event arrives.
    fn exec(&self, ctx: &mut TaskContext<'_>) -> Result<ExecOutcome>;

    /// Runs when the connection is torn down, or on the cancellation path
    /// for any node whose `init` ran (spec.md §4.5, §8 scenario 6).
    fn unload(&self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// The `cleanup` phase of an async offload task (spec.md §4.7): runs
    /// on-thread, back on a worker, once the offloaded `setup`+`exec`
    /// phase posts its `TaskCompletion`. Default behaviour is to treat any
    /// offload error as the exec's own failure and otherwise finish
    /// normally.
    fn on_async_complete(
        &self,
        ctx: &mut TaskContext<'_>,
        result: Result<()>,
    ) -> Result<ExecOutcome> {
        let _ = ctx;
        result.map(|_| ExecOutcome::Done)
    }
}

/// Result of running a servlet's `exec`.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The action ran to completion; outputs may be flushed.
    Done,
    /// The servlet registered async work and suspended (spec.md §4.7).
    Suspended,
}

/// A binary-metadata-equivalent: a named, constructible servlet plus its PD
/// table, installed once into a [`ServletFactory`] registry and referenced
/// by every node in the graph that uses it (spec.md §3 "Servlet instance").
pub struct ServletDescriptor {
    name: Box<str>,
    servlet: Arc<dyn Servlet>,
}

impl ServletDescriptor {
    pub fn new(name: impl Into<Box<str>>, servlet: Arc<dyn Servlet>) -> Self {
        Self {
            name: name.into(),
            servlet,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn servlet(&self) -> &Arc<dyn Servlet> {
        &self.servlet
    }

    pub fn pipe_descriptors(&self) -> &[PipeDescriptor] {
        self.servlet.pipe_descriptors()
    }
}

/// Registry of servlet descriptors by name, consulted when building a
/// service graph (`add_node(servlet_name)` resolves through here).
#[derive(Default)]
pub struct ServletFactory {
    entries: Vec<ServletDescriptor>,
}

impl ServletFactory {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, descriptor: ServletDescriptor) {
        self.entries.push(descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ServletDescriptor> {
        self.entries.iter().find(|d| d.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::descriptor::{Direction, PipeDescriptor};

    struct Echo {
        pds: Vec<PipeDescriptor>,
    }

    impl Servlet for Echo {
        fn description(&self) -> &str {
            "echo"
        }
        fn pipe_descriptors(&self) -> &[PipeDescriptor] {
            &self.pds
        }
        fn exec(&self, _ctx: &mut TaskContext<'_>) -> Result<ExecOutcome> {
            Ok(ExecOutcome::Done)
        }
    }

    #[test]
    fn factory_resolves_by_name() {
        let mut factory = ServletFactory::new();
        factory.register(ServletDescriptor::new(
            "demo.echo",
            Arc::new(Echo {
                pds: vec![
                    PipeDescriptor::new("in", Direction::Input),
                    PipeDescriptor::new("out", Direction::Output),
                ],
            }),
        ));
        let found = factory.get("demo.echo").unwrap();
        assert_eq!(found.pipe_descriptors().len(), 2);
        assert!(factory.get("demo.missing").is_none());
    }
}
