//! Hosted simulation of a target.
//!
//! Implements every agent collaborator on top of OS threads so that the agent
//! can run on a development host: a simulated CPU with interrupt locking and
//! context loads, a floating-point register bank, a thread-backed runtime and
//! a packet link to the host.

pub mod cpu;
pub mod fpu;
pub mod link;
pub mod runtime;

pub use cpu::SimCpu;
pub use fpu::SimFpu;
pub use link::{HostEnd, LinkXport, SimLink};
pub use runtime::ThreadRuntime;

use crate::agent::{Agent, AgentBuilder};
use crate::comm::CommMode;
use crate::config::AgentConfig;
use std::sync::{Arc, Mutex, PoisonError};

/// One observable step of the simulated target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStep {
    ExternEnter,
    ExternExit,
    CommMode(CommMode),
    FpuSaved,
    FpuLoaded,
    AgentLoaded { sp: u64 },
    SystemLoaded { pc: u64 },
    NotifySent { from_task: bool },
    ClockDisabled,
    ClockEnabled,
}

/// Ordered record of [`SimStep`]s, shared by the simulated devices.
#[derive(Debug, Clone, Default)]
pub struct SimTrace {
    steps: Arc<Mutex<Vec<SimStep>>>,
}

impl SimTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, step: SimStep) {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).push(step);
    }

    pub fn steps(&self) -> Vec<SimStep> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A complete simulated target with an agent wired to it.
pub struct SimTarget {
    pub agent: Arc<Agent>,
    pub cpu: Arc<SimCpu>,
    pub link: Arc<SimLink>,
    pub runtime: Arc<ThreadRuntime>,
    pub host: HostEnd,
    pub fpu: fpu::FpuBank,
    pub trace: SimTrace,
}

impl SimTarget {
    /// Build the target and the agent. No agent mode is initialized yet.
    pub fn new(config: AgentConfig) -> Self {
        let trace = SimTrace::new();
        let cpu = Arc::new(SimCpu::new(config.status_merge_mask, trace.clone()));
        let (link, host) = SimLink::new(cpu.clone(), trace.clone());
        let runtime = Arc::new(ThreadRuntime::new());

        let agent = AgentBuilder::new(cpu.clone(), link.clone())
            .config(config)
            .runtime(runtime.clone())
            .task_xport(Arc::new(link.task_xport()))
            .extern_xport(Arc::new(link.extern_xport()))
            .build();

        let fpu: fpu::FpuBank = Arc::new(Mutex::new([0; fpu::FPU_REGS]));
        agent.add_reg_set(Box::new(SimFpu::new(fpu.clone(), trace.clone())));

        Self { agent, cpu, link, runtime, host, fpu, trace }
    }
}
