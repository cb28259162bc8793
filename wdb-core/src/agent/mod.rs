//! Agent mode and context manager.
//!
//! One [`Agent`] owns every piece of mutable agent state: the active mode,
//! the modes the target supports, the saved context of the suspended system,
//! the external agent's own context, and the register-set registry. The
//! command loop runs either as a runtime task (task mode) or on a context
//! loaded over the suspended system (external mode).

mod cmd_loop;
mod context;
mod mode;

use crate::arch::{ArchInterface, ContextEntry};
use crate::comm::{CommInterface, PacketHook};
use crate::config::{AgentConfig, BringUp};
use crate::error::{Result, WdbError};
use crate::event::{EventQueue, TargetEvent};
use crate::monitor::{AgentEvent, Monitor};
use crate::regs::{RegSetRegistry, RegisterFile, RegisterSet};
use crate::rpc::RpcXport;
use crate::runtime::{RuntimeInterface, TaskEntry, TaskId, TaskSpec};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

bitflags! {
    /// Set of agent modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AgentModes: u32 {
        const TASK = 0b01;
        const EXTERN = 0b10;
    }
}

/// The mode currently dispatching commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Task,
    Extern,
}

impl AgentMode {
    pub const fn bit(self) -> AgentModes {
        match self {
            Self::Task => AgentModes::TASK,
            Self::Extern => AgentModes::EXTERN,
        }
    }
}

impl TryFrom<AgentModes> for AgentMode {
    type Error = WdbError;

    fn try_from(modes: AgentModes) -> Result<Self> {
        if modes == AgentModes::TASK {
            Ok(Self::Task)
        } else if modes == AgentModes::EXTERN {
            Ok(Self::Extern)
        } else {
            Err(WdbError::InvalidArgument(format!("mode {:#x} is not a single agent mode", modes.bits())))
        }
    }
}

/// Deferred action latched by a suspend and run once by the external
/// command loop.
pub type PendingCallback = Box<dyn FnOnce() + Send>;

pub(crate) struct AgentState {
    mode: AgentMode,
    available: AgentModes,
    one_shot: bool,
    task_id: Option<TaskId>,
    system_regs: RegisterFile,
    agent_regs: RegisterFile,
    reg_sets: RegSetRegistry,
    pending: Option<PendingCallback>,
}

pub struct Agent {
    config: AgentConfig,
    arch: Arc<dyn ArchInterface>,
    comm: Arc<dyn CommInterface>,
    runtime: Option<Arc<dyn RuntimeInterface>>,
    task_xport: Option<Arc<dyn RpcXport>>,
    extern_xport: Option<Arc<dyn RpcXport>>,
    events: EventQueue,
    monitor: Monitor,
    state: Mutex<AgentState>,
    extern_running: AtomicBool,
    connected: AtomicBool,
    self_ref: Weak<Agent>,
}

/// Collects the collaborators an [`Agent`] is built from.
pub struct AgentBuilder {
    config: AgentConfig,
    arch: Arc<dyn ArchInterface>,
    comm: Arc<dyn CommInterface>,
    runtime: Option<Arc<dyn RuntimeInterface>>,
    task_xport: Option<Arc<dyn RpcXport>>,
    extern_xport: Option<Arc<dyn RpcXport>>,
}

impl AgentBuilder {
    pub fn new(arch: Arc<dyn ArchInterface>, comm: Arc<dyn CommInterface>) -> Self {
        Self {
            config: AgentConfig::default(),
            arch,
            comm,
            runtime: None,
            task_xport: None,
            extern_xport: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeInterface>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn task_xport(mut self, xport: Arc<dyn RpcXport>) -> Self {
        self.task_xport = Some(xport);
        self
    }

    #[must_use]
    pub fn extern_xport(mut self, xport: Arc<dyn RpcXport>) -> Self {
        self.extern_xport = Some(xport);
        self
    }

    pub fn build(self) -> Arc<Agent> {
        Arc::new_cyclic(|self_ref| Agent {
            config: self.config,
            arch: self.arch,
            comm: self.comm,
            runtime: self.runtime,
            task_xport: self.task_xport,
            extern_xport: self.extern_xport,
            events: EventQueue::new(),
            monitor: Monitor::new(),
            state: Mutex::new(AgentState {
                mode: AgentMode::Task,
                available: AgentModes::empty(),
                one_shot: false,
                task_id: None,
                system_regs: RegisterFile::default(),
                agent_regs: RegisterFile::default(),
                reg_sets: RegSetRegistry::new(),
                pending: None,
            }),
            extern_running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }
}

impl Agent {
    pub(crate) fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.monitor.subscribe()
    }

    pub fn mode(&self) -> AgentMode {
        self.state().mode
    }

    pub fn available_modes(&self) -> AgentModes {
        self.state().available
    }

    /// Whether the external agent has suspended the system and owns the CPU.
    pub fn is_extern_running(&self) -> bool {
        self.extern_running.load(Ordering::SeqCst)
    }

    pub fn is_now_external(&self) -> bool {
        self.mode() == AgentMode::Extern && self.is_extern_running()
    }

    pub fn is_now_tasking(&self) -> bool {
        self.mode() == AgentMode::Task
    }

    pub fn runs_external(&self) -> bool {
        self.available_modes().contains(AgentModes::EXTERN)
    }

    pub fn runs_tasking(&self) -> bool {
        self.available_modes().contains(AgentModes::TASK)
    }

    pub fn one_shot(&self) -> bool {
        self.state().one_shot
    }

    /// Id of the task-mode agent, once it has been started.
    pub fn task_id(&self) -> Option<TaskId> {
        self.state().task_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        log::info!("Host {}", if connected { "connected" } else { "disconnected" });
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Queue a target event and tell the host about it.
    pub fn post_event(&self, event: TargetEvent) {
        log::debug!("Event posted: {event:?}");
        self.events.post(event);
        self.monitor.publish(AgentEvent::EventPosted);
        self.notify_host();
    }

    pub fn take_event(&self) -> Option<TargetEvent> {
        self.events.pop()
    }

    /// Integer registers of the suspended system. `None` while the system runs.
    pub fn system_registers(&self) -> Option<RegisterFile> {
        let state = self.state();
        self.is_extern_running().then_some(state.system_regs)
    }

    /// Start the task-mode agent.
    ///
    /// Needs a runtime and a task-mode transport. If the task is created but
    /// cannot be resumed it is deleted again and no state is recorded.
    pub fn init_task(
        &self,
        priority: u32,
        options: u32,
        stack_base: Option<u64>,
        stack_size: usize,
    ) -> Result<TaskId> {
        let (Some(runtime), Some(_)) = (&self.runtime, &self.task_xport) else {
            return Err(WdbError::NotSupported("task agent needs a runtime and a task-mode transport"));
        };

        let spec = TaskSpec {
            name: self.config.task_name.clone(),
            priority,
            options,
            stack_base,
            stack_size,
        };
        let agent = self.self_ref.clone();
        let entry: TaskEntry = Box::new(move || {
            if let Some(agent) = agent.upgrade() {
                agent.run_command_loop(false);
            }
        });

        let task = runtime.task_create(&spec, entry).map_err(|e| {
            log::warn!("Failed to create agent task: {e:#}");
            WdbError::Resource(format!("{e:#}"))
        })?;

        if let Err(e) = runtime.task_resume(task) {
            log::error!("Failed to resume agent task {task:?}: {e:#}");
            if let Err(e) = runtime.task_delete(task) {
                log::warn!("Failed to delete agent task {task:?}: {e:#}");
            }
            return Err(WdbError::Resource(format!("{e:#}")));
        }

        {
            let mut state = self.state();
            state.available |= AgentModes::TASK;
            state.task_id = Some(task);
        }
        log::info!("Task agent {} started as {task:?}", spec.name);
        self.monitor.publish(AgentEvent::TaskAgentStarted(task));
        Ok(task)
    }

    /// Prepare the external agent context on the stack ending at `stack_top`.
    pub fn init_extern(&self, stack_top: u64) -> Result<()> {
        if self.extern_xport.is_none() {
            return Err(WdbError::NotSupported("external agent needs an external-mode transport"));
        }

        let agent = self.self_ref.clone();
        let entry: ContextEntry = Arc::new(move || {
            if let Some(agent) = agent.upgrade() {
                agent.run_command_loop(true);
            }
        });
        let mut regs = RegisterFile::default();
        self.arch.context_setup(&mut regs, stack_top, entry);
        self.arch.context_int_lock(&mut regs);

        {
            let mut state = self.state();
            state.agent_regs = regs;
            state.available |= AgentModes::EXTERN;
        }
        self.comm.hook_add(Some(self.first_packet_hook()));

        log::info!("External agent ready, stack top {stack_top:#x}");
        self.monitor.publish(AgentEvent::ExternAgentReady);
        Ok(())
    }

    /// Register an auxiliary register set saved and restored around every
    /// suspension.
    pub fn add_reg_set(&self, set: Box<dyn RegisterSet>) {
        self.state().reg_sets.add(set);
    }

    /// Bring up the modes named by the configuration and select the initial
    /// mode. A mode that fails to initialize is skipped; the other one is
    /// still brought up.
    pub fn bring_up(&self) -> AgentModes {
        let want = self.config.initial_mode;

        if matches!(want, BringUp::Task | BringUp::Bimodal) {
            if let Err(e) = self.init_task(
                self.config.task_priority,
                self.config.task_options,
                None,
                self.config.task_stack_size,
            ) {
                log::warn!("Task mode unavailable: {e}");
            }
        }
        if matches!(want, BringUp::Extern | BringUp::Bimodal) {
            if let Err(e) = self.config.extern_stack_top().and_then(|top| self.init_extern(top)) {
                log::warn!("External mode unavailable: {e}");
            }
        }

        let available = self.available_modes();
        let initial = if available.contains(AgentModes::TASK) {
            Some(AgentMode::Task)
        } else if available.contains(AgentModes::EXTERN) {
            Some(AgentMode::Extern)
        } else {
            log::error!("No agent mode could be initialized");
            None
        };
        if let Some(mode) = initial {
            if let Err(e) = self.set_mode(mode.bit()) {
                log::error!("Failed to select initial mode {mode:?}: {e}");
            }
        }
        available
    }

    fn first_packet_hook(&self) -> PacketHook {
        let agent = self.self_ref.clone();
        Arc::new(move || {
            if let Some(agent) = agent.upgrade() {
                if let Err(e) = agent.suspend_system_here(None) {
                    log::warn!("First-packet suspend failed: {e}");
                }
            }
        })
    }
}
