//! Suspend and resume of the target system.
//!
//! Both transitions run with interrupts locked from start to the final
//! context load. Neither returns to its caller.

use super::{Agent, AgentModes, PendingCallback};
use crate::comm::CommMode;
use crate::error::{Result, WdbError};
use crate::monitor::AgentEvent;
use crate::regs::{RegSetData, RegSetType, RegisterFile, CHECKPOINT_RESUMED};
use std::convert::Infallible;
use std::sync::atomic::Ordering;

impl Agent {
    /// Suspend the system whose registers a trap handler captured in `regs`
    /// and switch to the external agent. `callback` runs once in the agent
    /// context before the first receive.
    ///
    /// Returns only if the external agent was never initialized.
    pub fn suspend_system(
        &self,
        regs: &RegisterFile,
        callback: Option<PendingCallback>,
    ) -> Result<Infallible> {
        if !self.runs_external() {
            return Err(WdbError::NotSupported("external agent not initialized"));
        }
        // Never unlocked here: the agent context is loaded with interrupts locked.
        let _key = self.arch.int_lock();
        let agent_regs = self.enter_external(*regs, callback);
        self.arch.context_load(&agent_regs)
    }

    /// Suspend the calling context itself. Returns once the system is resumed.
    pub fn suspend_system_here(&self, callback: Option<PendingCallback>) -> Result<()> {
        if !self.runs_external() {
            return Err(WdbError::NotSupported("external agent not initialized"));
        }
        let key = self.arch.int_lock();
        let clock_was_running = self.arch.sys_clk_disable();

        let mut callback = callback;
        self.arch.checkpoint_switch(&mut |mut regs: RegisterFile| {
            regs.set_return_value(CHECKPOINT_RESUMED);
            self.enter_external(regs, callback.take())
        });

        if clock_was_running {
            self.arch.sys_clk_enable();
        }
        self.arch.int_unlock(key);
        Ok(())
    }

    /// Save the system state and return the agent context to load.
    fn enter_external(&self, system: RegisterFile, callback: Option<PendingCallback>) -> RegisterFile {
        let agent_regs = {
            let mut state = self.state();
            state.pending = callback;
            self.extern_running.store(true, Ordering::SeqCst);
            self.arch.extern_enter();
            self.comm.mode_set(CommMode::Poll);

            state.system_regs = system;
            state.reg_sets.save_all();

            let system_regs = state.system_regs;
            self.arch.status_merge(&mut state.agent_regs, &system_regs);
            state.agent_regs
        };
        log::debug!("System suspended at pc {:#x}", system.pc);
        self.monitor.publish(AgentEvent::SystemSuspended { pc: system.pc });
        agent_regs
    }

    /// Give the CPU back to the suspended system.
    pub fn resume_system(&self) -> ! {
        let _key = self.arch.int_lock();
        let system_regs = {
            let mut state = self.state();
            self.extern_running.store(false, Ordering::SeqCst);
            if state.available.contains(AgentModes::TASK) {
                self.comm.mode_set(CommMode::Interrupt);
            }
            state.one_shot = false;
            self.arch.extern_exit();
            state.reg_sets.load_all();
            state.system_regs
        };
        log::debug!("Resuming system at pc {:#x}", system_regs.pc);
        self.monitor.publish(AgentEvent::SystemResumed { pc: system_regs.pc });
        self.arch.context_load(&system_regs)
    }

    /// Read a register set of the suspended system. The integer unit comes
    /// from the saved context, everything else from the registry.
    pub fn get_registers(&self, reg_type: RegSetType) -> Result<RegSetData> {
        let state = self.state();
        match reg_type {
            RegSetType::Iu => Ok(RegSetData::Iu(state.system_regs)),
            other => state.reg_sets.get(other).map(RegSetData::Raw),
        }
    }

    pub fn set_registers(&self, reg_type: RegSetType, data: RegSetData) -> Result<()> {
        let mut state = self.state();
        match (reg_type, data) {
            (RegSetType::Iu, RegSetData::Iu(regs)) => {
                state.system_regs = regs;
                Ok(())
            }
            (RegSetType::Iu, RegSetData::Raw(_)) | (_, RegSetData::Iu(_)) => Err(
                WdbError::InvalidArgument(format!("register data does not match {reg_type:?}")),
            ),
            (other, RegSetData::Raw(bytes)) => state.reg_sets.set(other, &bytes),
        }
    }
}
