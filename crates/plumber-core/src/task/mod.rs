//! A single servlet invocation inside one request (spec.md §3 "Task", §4.2).

use crate::error::{codes, ErrorCategory, PlumberError, Result};
use crate::pipe::handle::{PipeHandle, WriteOutcome};
use crate::rls::Rls;
use crate::servlet::Action;

/// Node ID: a service-graph-local integer identifying a servlet instance
/// (spec.md §3 "Node ID").
pub type NodeId = usize;

/// The runtime instance of one servlet invocation (spec.md §3 "Task").
/// The pipe-handle table is declared as a flexible array in the original;
/// here it is simply a `Vec` sized to the servlet's PD count at task
/// creation, indexed by PD.
pub struct Task {
    pub node: NodeId,
    pub action: Action,
    pipes: Vec<Option<PipeHandle>>,
}

impl Task {
    pub fn new(node: NodeId, action: Action, pd_count: usize) -> Self {
        let mut pipes = Vec::with_capacity(pd_count);
        pipes.resize_with(pd_count, || None);
        Self {
            node,
            action,
            pipes,
        }
    }

    pub fn bind_pipe(&mut self, pd: usize, handle: PipeHandle) {
        self.pipes[pd] = Some(handle);
    }

    pub fn take_pipe(&mut self, pd: usize) -> Option<PipeHandle> {
        self.pipes[pd].take()
    }

    pub fn pipe_mut(&mut self, pd: usize) -> Option<&mut PipeHandle> {
        self.pipes[pd].as_mut()
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }
}

/// Capability to register async offload work (spec.md §4.7), handed to a
/// [`TaskContext`] only when the worker driving this request has an async
/// offload pool attached.
#[derive(Clone)]
pub struct AsyncHandle {
    pub(crate) pool: std::sync::Arc<crate::scheduler::async_offload::AsyncOffloadPool>,
    pub(crate) equeue: crate::scheduler::equeue::Equeue,
    pub(crate) rsc_id: u64,
    pub(crate) node: NodeId,
}

/// The view a running servlet action sees: its own task's pipe table plus
/// the request's RLS. Borrowed for the duration of one `init`/`exec`/
/// `unload` call; never retained past it (spec.md §9 "Current-task TLS").
pub struct TaskContext<'a> {
    task: &'a mut Task,
    rls: &'a mut Rls,
    async_handle: Option<AsyncHandle>,
}

impl<'a> TaskContext<'a> {
    pub fn new(task: &'a mut Task, rls: &'a mut Rls) -> Self {
        Self {
            task,
            rls,
            async_handle: None,
        }
    }

    pub fn with_async(mut self, handle: AsyncHandle) -> Self {
        self.async_handle = Some(handle);
        self
    }

    /// Registers `job` (the `setup`+`exec` phases, spec.md §4.7) on the
    /// async offload pool. The servlet must still return
    /// `ExecOutcome::Suspended` from `exec` — this only submits the work
    /// and arranges for its result to re-enter the step loop as a
    /// `TaskCompletion` event; it does not itself suspend anything.
    pub fn spawn_async(
        &self,
        job: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Result<()> {
        let handle = self.async_handle.as_ref().ok_or_else(|| {
            PlumberError::new(
                codes::USAGE_INVALID_ARGUMENT,
                ErrorCategory::Usage,
                "async offload is not available in this context",
            )
        })?;
        let equeue = handle.equeue.clone();
        let rsc_id = handle.rsc_id;
        let node = handle.node;
        handle.pool.submit(move || {
            let result = job();
            equeue.push(crate::scheduler::equeue::Event::Completion(
                crate::scheduler::equeue::TaskCompletion { rsc_id, node, result },
            ));
        });
        Ok(())
    }

    pub fn node(&self) -> NodeId {
        self.task.node
    }

    pub fn action(&self) -> Action {
        self.task.action
    }

    pub fn rls(&mut self) -> &mut Rls {
        self.rls
    }

    fn pipe_mut(&mut self, pd: usize) -> Result<&mut PipeHandle> {
        self.task
            .pipes
            .get_mut(pd)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                PlumberError::new(
                    codes::USAGE_INVALID_ARGUMENT,
                    ErrorCategory::Usage,
                    format!("no pipe bound at pd {pd}"),
                )
            })
    }

    /// `pipe_read` (spec.md §6): zero-length buffer is a no-op (spec.md §8).
    pub fn pipe_read(&mut self, pd: usize, buf: &mut [u8]) -> Result<usize> {
        self.pipe_mut(pd)?.read(buf)
    }

    /// `pipe_write` (spec.md §6).
    pub fn pipe_write(&mut self, pd: usize, buf: &[u8]) -> Result<WriteOutcome> {
        Ok(self.pipe_mut(pd)?.write(buf))
    }

    /// `pipe_eof` (spec.md §6).
    pub fn pipe_eof(&mut self, pd: usize) -> Result<bool> {
        Ok(self.pipe_mut(pd)?.eof())
    }

    /// `pipe_cntl` (spec.md §6).
    pub fn pipe_cntl(&mut self, pd: usize, opcode: u32, args: &[u8]) -> Result<Vec<u8>> {
        self.pipe_mut(pd)?.invoke(opcode, args)
    }
}

thread_local! {
    /// "Currently executing task" slot (spec.md §9 "Current-task TLS").
    /// Calling runtime APIs that consult this from a thread not presently
    /// inside a step is undefined behaviour at the API-contract level (it
    /// simply reads `None` here rather than invoking UB in the unsafe
    /// sense, since Rust gives us a safe `Cell` instead of a raw pointer).
    static CURRENT_TASK: std::cell::Cell<Option<NodeId>> = const { std::cell::Cell::new(None) };
}

/// Installs `node` as the current task for the duration of `f`, mirroring
/// the step loop's `set_current_task` (spec.md §4.5 step 2).
pub fn with_current_task<R>(node: NodeId, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_TASK.with(|slot| slot.replace(Some(node)));
    let result = f();
    CURRENT_TASK.with(|slot| slot.set(previous));
    result
}

/// Reads the current task's node ID, if any (servlet callbacks use this to
/// resolve which task's pipe table a bare PD refers to).
pub fn current_task() -> Option<NodeId> {
    CURRENT_TASK.with(|slot| slot.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_task_is_scoped_and_restored() {
        assert_eq!(current_task(), None);
        with_current_task(7, || {
            assert_eq!(current_task(), Some(7));
        });
        assert_eq!(current_task(), None);
    }

    #[test]
    fn pipe_table_sized_to_pd_count() {
        let task = Task::new(0, Action::Exec, 3);
        assert_eq!(task.pipe_count(), 3);
    }
}
