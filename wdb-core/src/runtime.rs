//! Runtime interface: the host RTOS thread primitives used to start the
//! task-mode agent.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

/// Entry point handed to a new task.
pub type TaskEntry = Box<dyn FnOnce() + Send>;

/// Creation parameters for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub priority: u32,
    pub options: u32,
    /// Caller-provided stack; `None` lets the runtime allocate one.
    pub stack_base: Option<u64>,
    pub stack_size: usize,
}

pub trait RuntimeInterface: Send + Sync {
    /// Create a task that does not run until [`task_resume`](Self::task_resume).
    fn task_create(&self, spec: &TaskSpec, entry: TaskEntry) -> Result<TaskId>;

    fn task_resume(&self, task: TaskId) -> Result<()>;

    fn task_delete(&self, task: TaskId) -> Result<()>;
}
