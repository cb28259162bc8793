//! Thread-backed runtime for the task-mode agent.

use crate::runtime::{RuntimeInterface, TaskEntry, TaskId, TaskSpec};
use anyhow::{anyhow, bail, Context as _, Result};
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

/// Host threads need more stack than a target task.
const MIN_THREAD_STACK: usize = 256 * 1024;

struct Task {
    name: String,
    start: Option<Sender<()>>,
}

/// Runs every task on its own OS thread, parked until resumed.
#[derive(Default)]
pub struct ThreadRuntime {
    tasks: Mutex<HashMap<TaskId, Task>>,
    next_id: AtomicU64,
    deleted: AtomicU64,
    fail_next_create: AtomicBool,
    fail_next_resume: AtomicBool,
}

impl ThreadRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `task_create` fail.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Make the next `task_resume` fail.
    pub fn fail_next_resume(&self) {
        self.fail_next_resume.store(true, Ordering::SeqCst);
    }

    /// Tasks created and not deleted.
    pub fn live_tasks(&self) -> usize {
        self.tasks().len()
    }

    pub fn deleted_tasks(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn task_name(&self, task: TaskId) -> Option<String> {
        self.tasks().get(&task).map(|t| t.name.clone())
    }
}

impl RuntimeInterface for ThreadRuntime {
    fn task_create(&self, spec: &TaskSpec, entry: TaskEntry) -> Result<TaskId> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            bail!("no memory for task {}", spec.name);
        }

        let (start_tx, start_rx) = crossbeam_channel::bounded::<()>(1);
        thread::Builder::new()
            .name(spec.name.clone())
            .stack_size(spec.stack_size.max(MIN_THREAD_STACK))
            .spawn(move || {
                // A task deleted before it was resumed never runs.
                if start_rx.recv().is_ok() {
                    entry();
                }
            })
            .with_context(|| format!("Failed to spawn thread for task {}", spec.name))?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.tasks().insert(id, Task { name: spec.name.clone(), start: Some(start_tx) });
        log::debug!("Task {} created as {id:?} (priority {})", spec.name, spec.priority);
        Ok(id)
    }

    fn task_resume(&self, task: TaskId) -> Result<()> {
        if self.fail_next_resume.swap(false, Ordering::SeqCst) {
            bail!("cannot resume task {task:?}");
        }
        let mut tasks = self.tasks();
        let entry = tasks.get_mut(&task).ok_or_else(|| anyhow!("unknown task {task:?}"))?;
        if let Some(start) = entry.start.take() {
            start.send(()).context("Task thread exited before start")?;
        }
        Ok(())
    }

    /// Deleting a task that already runs only forgets it; its thread keeps
    /// running.
    fn task_delete(&self, task: TaskId) -> Result<()> {
        self.tasks().remove(&task).ok_or_else(|| anyhow!("unknown task {task:?}"))?;
        self.deleted.fetch_add(1, Ordering::SeqCst);
        log::debug!("Task {task:?} deleted");
        Ok(())
    }
}
