//! Simulated CPU.
//!
//! Every execution context is an OS thread and at most one of them owns the
//! CPU. Loading the external agent context starts its entry on a new agent
//! thread while the suspended thread waits. Loading any other register file
//! hands the CPU back to the suspended thread. A context load abandons the
//! caller's stack, so the abandoned agent thread unwinds and exits.

use super::{SimStep, SimTrace};
use crate::arch::{ArchInterface, ContextEntry};
use crate::regs::RegisterFile;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Program counters handed out for context entry points.
const ENTRY_PC_BASE: u64 = 0xffff_0000_0000_0000;

/// Status bits set by `context_int_lock`: interrupt priority level 7.
pub const STATUS_INT_LOCK: u64 = 0x0700;

/// Baseline status of a freshly set-up context: supervisor state.
pub const STATUS_SUPERVISOR: u64 = 0x2000;

/// Unwind payload that ends an abandoned agent stack.
struct StackAbandoned;

/// Unwind payload that returns a resumed trap to [`SimCpu::trap`].
struct TrapReturn(RegisterFile);

struct Suspended {
    thread: ThreadId,
    lock_depth: u64,
}

struct CpuState {
    lock_owner: Option<ThreadId>,
    lock_depth: u64,
    /// Thread running the external agent context, if it owns the CPU.
    agent_thread: Option<ThreadId>,
    suspended: Option<Suspended>,
    resumed: Option<RegisterFile>,
    /// Register state a checkpoint captures.
    live: RegisterFile,
    suspensions: u64,
}

pub struct SimCpu {
    state: Mutex<CpuState>,
    cond: Condvar,
    entries: Mutex<HashMap<u64, ContextEntry>>,
    next_entry: AtomicU64,
    status_mask: u64,
    clock_running: AtomicBool,
    trace: SimTrace,
}

impl SimCpu {
    pub fn new(status_mask: u64, trace: SimTrace) -> Self {
        Self {
            state: Mutex::new(CpuState {
                lock_owner: None,
                lock_depth: 0,
                agent_thread: None,
                suspended: None,
                resumed: None,
                live: RegisterFile::default(),
                suspensions: 0,
            }),
            cond: Condvar::new(),
            entries: Mutex::new(HashMap::new()),
            next_entry: AtomicU64::new(0),
            status_mask,
            clock_running: AtomicBool::new(true),
            trace,
        }
    }

    fn cpu(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, CpuState>) -> MutexGuard<'a, CpuState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers of the running system, as a checkpoint would capture them.
    pub fn live_registers(&self) -> RegisterFile {
        self.cpu().live
    }

    pub fn set_live_registers(&self, regs: RegisterFile) {
        self.cpu().live = regs;
    }

    /// Whether the external agent currently owns the CPU.
    pub fn is_external(&self) -> bool {
        self.cpu().agent_thread.is_some()
    }

    /// Block a system thread while the external agent owns the CPU.
    pub fn wait_not_external(&self) {
        let me = thread::current().id();
        let mut cpu = self.cpu();
        while cpu.agent_thread.is_some_and(|t| t != me) {
            cpu = self.wait(cpu);
        }
    }

    pub fn interrupts_locked(&self) -> bool {
        self.cpu().lock_owner.is_some()
    }

    pub fn clock_running(&self) -> bool {
        self.clock_running.load(Ordering::SeqCst)
    }

    /// Number of times the system has been suspended.
    pub fn suspensions(&self) -> u64 {
        self.cpu().suspensions
    }

    /// Run `handler` as a trap handler of the calling thread, which takes
    /// the role of the interrupted system.
    ///
    /// Returns the register file the system was resumed with, or `None` if
    /// the handler returned without switching context.
    pub fn trap<F>(&self, regs: RegisterFile, handler: F) -> Option<RegisterFile>
    where
        F: FnOnce(RegisterFile),
    {
        let me = thread::current().id();
        let entry_depth = {
            let cpu = self.cpu();
            if cpu.lock_owner == Some(me) { cpu.lock_depth } else { 0 }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(regs))) {
            Ok(()) => None,
            Err(payload) => match payload.downcast::<TrapReturn>() {
                Ok(resumed) => {
                    // The interrupted code continues with its own interrupt state.
                    self.int_unlock(entry_depth);
                    Some(resumed.0)
                }
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    /// Hand the CPU to the context described by `regs`.
    fn switch_to(&self, regs: &RegisterFile) {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&regs.pc)
            .cloned();
        let me = thread::current().id();

        let mut cpu = self.cpu();
        match entry {
            Some(entry) => {
                if cpu.agent_thread != Some(me) {
                    cpu.suspended = Some(Suspended { thread: me, lock_depth: cpu.lock_depth });
                    cpu.suspensions += 1;
                }
                cpu.lock_owner = None;
                cpu.lock_depth = 0;
                cpu.resumed = None;
                self.trace.record(SimStep::AgentLoaded { sp: regs.sp });

                let spawned = thread::Builder::new()
                    .name("tWdbExtern".to_string())
                    .spawn(move || run_agent_context(&entry));
                match spawned {
                    Ok(handle) => cpu.agent_thread = Some(handle.thread().id()),
                    Err(e) => log::error!("Failed to start agent context: {e}"),
                }
            }
            None => {
                cpu.agent_thread = None;
                match cpu.suspended.take() {
                    Some(suspended) => {
                        cpu.lock_owner = Some(suspended.thread);
                        cpu.lock_depth = suspended.lock_depth;
                    }
                    None => {
                        cpu.lock_owner = None;
                        cpu.lock_depth = 0;
                    }
                }
                cpu.live = *regs;
                cpu.resumed = Some(*regs);
                self.trace.record(SimStep::SystemLoaded { pc: regs.pc });
            }
        }
        drop(cpu);
        self.cond.notify_all();
    }

    /// Block the suspended caller until a system context is loaded.
    fn wait_resumed(&self) -> RegisterFile {
        let mut cpu = self.cpu();
        loop {
            if let Some(regs) = cpu.resumed.take() {
                return regs;
            }
            cpu = self.wait(cpu);
        }
    }
}

fn run_agent_context(entry: &ContextEntry) {
    match panic::catch_unwind(AssertUnwindSafe(|| entry())) {
        Ok(()) => log::warn!("Agent context returned"),
        Err(payload) if payload.is::<StackAbandoned>() => {}
        Err(payload) => panic::resume_unwind(payload),
    }
}

impl ArchInterface for SimCpu {
    fn int_lock(&self) -> u64 {
        let me = thread::current().id();
        let mut cpu = self.cpu();
        loop {
            let stolen = cpu.agent_thread.is_some_and(|t| t != me);
            let held = cpu.lock_owner.is_some_and(|t| t != me);
            if !stolen && !held {
                break;
            }
            cpu = self.wait(cpu);
        }
        let key = cpu.lock_depth;
        cpu.lock_owner = Some(me);
        cpu.lock_depth += 1;
        key
    }

    fn int_unlock(&self, key: u64) {
        let mut cpu = self.cpu();
        cpu.lock_depth = key;
        if key == 0 {
            cpu.lock_owner = None;
        }
        drop(cpu);
        self.cond.notify_all();
    }

    fn context_setup(&self, regs: &mut RegisterFile, stack_top: u64, entry: ContextEntry) {
        let pc = ENTRY_PC_BASE + self.next_entry.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(pc, entry);
        *regs = RegisterFile { sp: stack_top, pc, status: STATUS_SUPERVISOR, ..RegisterFile::default() };
    }

    fn context_int_lock(&self, regs: &mut RegisterFile) {
        regs.status |= STATUS_INT_LOCK;
    }

    fn checkpoint_switch(&self, switch: &mut dyn FnMut(RegisterFile) -> RegisterFile) {
        let captured = self.live_registers();
        let target = switch(captured);
        self.switch_to(&target);
        let resumed = self.wait_resumed();
        log::trace!("Checkpoint resumed at pc {:#x}", resumed.pc);
    }

    fn context_load(&self, regs: &RegisterFile) -> ! {
        let me = thread::current().id();
        let from_agent = self.cpu().agent_thread == Some(me);
        self.switch_to(regs);

        if from_agent {
            panic::resume_unwind(Box::new(StackAbandoned));
        }
        // A trap handler switched away from the system: the trap returns
        // when the system is resumed.
        let resumed = self.wait_resumed();
        panic::resume_unwind(Box::new(TrapReturn(resumed)))
    }

    fn status_merge_mask(&self) -> u64 {
        self.status_mask
    }

    fn extern_enter(&self) {
        self.trace.record(SimStep::ExternEnter);
    }

    fn extern_exit(&self) {
        self.trace.record(SimStep::ExternExit);
    }

    fn sys_clk_disable(&self) -> bool {
        let was_running = self.clock_running.swap(false, Ordering::SeqCst);
        if was_running {
            self.trace.record(SimStep::ClockDisabled);
        }
        was_running
    }

    fn sys_clk_enable(&self) {
        self.clock_running.store(true, Ordering::SeqCst);
        self.trace.record(SimStep::ClockEnabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_int_lock_nests() {
        let cpu = SimCpu::new(0x0700, SimTrace::new());
        assert!(!cpu.interrupts_locked());

        let outer = cpu.int_lock();
        let inner = cpu.int_lock();
        assert_eq!((outer, inner), (0, 1));
        assert!(cpu.interrupts_locked());

        cpu.int_unlock(inner);
        assert!(cpu.interrupts_locked());
        cpu.int_unlock(outer);
        assert!(!cpu.interrupts_locked());
    }

    #[test]
    fn test_context_setup_and_status_merge() {
        let cpu = SimCpu::new(0x0700, SimTrace::new());
        let mut agent = RegisterFile::default();
        cpu.context_setup(&mut agent, 0x8000, Arc::new(|| {}));
        cpu.context_int_lock(&mut agent);
        assert_eq!(agent.sp, 0x8000);
        assert_eq!(agent.status, STATUS_SUPERVISOR | STATUS_INT_LOCK);

        let system = RegisterFile { status: 0x0300 | 0x0010, ..RegisterFile::default() };
        cpu.status_merge(&mut agent, &system);
        assert_eq!(agent.status, STATUS_SUPERVISOR | 0x0300);
    }

    #[test]
    fn test_trap_round_trip_through_agent_thread() {
        let trace = SimTrace::new();
        let cpu = Arc::new(SimCpu::new(0x0700, trace.clone()));
        let (ran_tx, ran_rx) = mpsc::channel();

        let system = RegisterFile { pc: 0x4000, sp: 0x9000, status: 0x2300, ..RegisterFile::default() };
        let agent_cpu = cpu.clone();
        let mut agent = RegisterFile::default();
        cpu.context_setup(
            &mut agent,
            0x1000,
            Arc::new(move || {
                ran_tx.send(thread::current().id()).unwrap();
                agent_cpu.context_load(&system)
            }),
        );

        let resumed = cpu.trap(system, |_| cpu.context_load(&agent));
        assert_eq!(resumed, Some(system));

        let agent_thread = ran_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(agent_thread, thread::current().id());
        assert!(!cpu.is_external());
        assert!(!cpu.interrupts_locked());
        assert_eq!(cpu.suspensions(), 1);
        assert_eq!(
            trace.steps(),
            vec![SimStep::AgentLoaded { sp: 0x1000 }, SimStep::SystemLoaded { pc: 0x4000 }]
        );
    }

    #[test]
    fn test_system_threads_wait_for_external_agent() {
        let cpu = Arc::new(SimCpu::new(0x0700, SimTrace::new()));
        let system = RegisterFile { pc: 0x4000, ..RegisterFile::default() };
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let agent_cpu = cpu.clone();
        let mut agent = RegisterFile::default();
        cpu.context_setup(
            &mut agent,
            0x1000,
            Arc::new(move || {
                // The agent itself never waits on its own ownership.
                agent_cpu.wait_not_external();
                let _ = release_rx.lock().unwrap().recv();
                agent_cpu.context_load(&system)
            }),
        );

        let trap_cpu = cpu.clone();
        let trapped = thread::spawn(move || trap_cpu.trap(system, |_| trap_cpu.context_load(&agent)));
        while !cpu.is_external() {
            thread::sleep(Duration::from_millis(5));
        }

        let (done_tx, done_rx) = mpsc::channel();
        let task_cpu = cpu.clone();
        thread::spawn(move || {
            task_cpu.wait_not_external();
            done_tx.send(task_cpu.is_external()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert_eq!(trapped.join().unwrap(), Some(system));
    }

    #[test]
    fn test_trap_without_switch_returns_none() {
        let cpu = SimCpu::new(0x0700, SimTrace::new());
        assert_eq!(cpu.trap(RegisterFile::default(), |_| {}), None);
    }
}
