//! Communication interface.
//!
//! The packet transport underneath the RPC layer, seen from the agent: its
//! delivery mode, the first-packet hook and receive cancellation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommMode {
    /// Packets are delivered from the receive interrupt.
    Interrupt,
    /// The agent polls the device. Required while the system is suspended.
    Poll,
}

/// Called when a packet arrives while the target system runs normally.
pub type PacketHook = Arc<dyn Fn() + Send + Sync>;

pub trait CommInterface: Send + Sync {
    /// Switch the delivery model. Must be callable with interrupts locked.
    fn mode_set(&self, mode: CommMode);

    fn mode(&self) -> CommMode;

    /// Install, or remove with `None`, the first-packet hook.
    fn hook_add(&self, hook: Option<PacketHook>);

    /// Abort a blocking task-mode receive. Non-blocking, callable from any thread.
    fn cancel(&self);
}
