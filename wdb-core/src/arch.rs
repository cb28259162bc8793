//! Architecture layer.
//!
//! The primitives the agent needs from the CPU port: interrupt locking,
//! context setup, checkpointing, and the non-returning context load.

use crate::regs::RegisterFile;
use std::sync::Arc;

/// Code a freshly set-up context starts executing when it is loaded.
pub type ContextEntry = Arc<dyn Fn() + Send + Sync>;

pub trait ArchInterface: Send + Sync {
    /// Disable interrupts and return the key needed to restore them.
    fn int_lock(&self) -> u64;

    fn int_unlock(&self, key: u64);

    /// Prepare `regs` so that loading it runs `entry` on the stack whose top
    /// is `stack_top`.
    fn context_setup(&self, regs: &mut RegisterFile, stack_top: u64, entry: ContextEntry);

    /// Mark `regs` so that interrupts are disabled when it is loaded.
    fn context_int_lock(&self, regs: &mut RegisterFile);

    /// Capture the calling context and pass it to `switch`, which returns the
    /// context to load in its place. Returns when the captured context is
    /// loaded again.
    fn checkpoint_switch(&self, switch: &mut dyn FnMut(RegisterFile) -> RegisterFile);

    /// Replace the CPU's active register file with `regs`.
    fn context_load(&self, regs: &RegisterFile) -> !;

    /// Status bits carried from the suspended system into the agent context.
    fn status_merge_mask(&self) -> u64;

    fn status_merge(&self, agent: &mut RegisterFile, system: &RegisterFile) {
        let mask = self.status_merge_mask();
        agent.status = (agent.status & !mask) | (system.status & mask);
    }

    /// Board hook run when the system is suspended.
    fn extern_enter(&self) {}

    /// Board hook run just before the system is resumed.
    fn extern_exit(&self) {}

    /// Stop the system clock. Returns whether it was running.
    fn sys_clk_disable(&self) -> bool {
        false
    }

    fn sys_clk_enable(&self) {}
}
