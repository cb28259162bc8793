//! Agent configuration.
//!
//! Tuning constants for the command loop and the context switch, plus the
//! bring-up parameters for both agent modes.

use crate::error::{Result, WdbError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which agent modes the bring-up initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BringUp {
    Task,
    Extern,
    #[default]
    Bimodal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Receive timeout used by the command loop while events are pending.
    pub notify_poll_timeout_ms: u64,
    /// Status bits carried from the suspended system into the external agent.
    pub status_merge_mask: u64,
    pub task_name: String,
    pub task_priority: u32,
    pub task_options: u32,
    pub task_stack_size: usize,
    pub extern_stack_base: u64,
    pub extern_stack_size: usize,
    pub initial_mode: BringUp,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            notify_poll_timeout_ms: 3000,
            status_merge_mask: 0x0700,
            task_name: "tWdbTask".to_string(),
            task_priority: 3,
            task_options: 0,
            task_stack_size: 0x2000,
            extern_stack_base: 0,
            extern_stack_size: 0x1000,
            initial_mode: BringUp::Bimodal,
        }
    }
}

impl AgentConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WdbError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| WdbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_name.is_empty() {
            return Err(WdbError::Config("task_name must not be empty".to_string()));
        }
        if self.task_stack_size == 0 {
            return Err(WdbError::Config("task_stack_size must be non-zero".to_string()));
        }
        if self.extern_stack_size == 0 {
            return Err(WdbError::Config("extern_stack_size must be non-zero".to_string()));
        }
        self.extern_stack_top()?;
        Ok(())
    }

    pub fn notify_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_poll_timeout_ms)
    }

    /// Top of the external agent stack; stacks grow down.
    pub fn extern_stack_top(&self) -> Result<u64> {
        u64::try_from(self.extern_stack_size)
            .ok()
            .and_then(|size| self.extern_stack_base.checked_add(size))
            .ok_or_else(|| WdbError::Config("external agent stack exceeds the address space".to_string()))
    }
}
