//! WDB Core - the target-resident debug agent.
//!
//! This crate holds the agent's mode and context manager: it suspends and
//! resumes the target system, runs the command loop in task or external
//! mode, notifies the host of pending events and dispatches register-set
//! access. The CPU, communication device and runtime are reached through
//! traits; the `sim` feature provides hosted implementations of them.

pub mod agent;
pub mod arch;
pub mod comm;
pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod regs;
pub mod rpc;
pub mod runtime;
#[cfg(feature = "sim")]
pub mod sim;

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder, AgentMode, AgentModes, PendingCallback};
pub use arch::{ArchInterface, ContextEntry};
pub use comm::{CommInterface, CommMode, PacketHook};
pub use config::{AgentConfig, BringUp};
pub use error::{Result, WdbError};
pub use event::{EventQueue, TargetEvent};
pub use monitor::{AgentEvent, Monitor};
pub use regs::{RegSetData, RegSetRegistry, RegSetType, RegisterFile, RegisterSet};
pub use rpc::{Reply, Request, RpcXport};
pub use runtime::{RuntimeInterface, TaskEntry, TaskId, TaskSpec};
#[cfg(feature = "sim")]
pub use sim::SimTarget;
