//! Register files and the register-set registry.
//!
//! The integer unit is always present and lives directly in the agent's saved
//! system context. Every other register class (floating point, vector units,
//! coprocessors) is a [`RegisterSet`] plugged into a [`RegSetRegistry`].

use crate::error::{Result, WdbError};
use serde::{Deserialize, Serialize};

pub const NUM_GPRS: usize = 16;

/// Value written into the return-value register of a checkpoint, so that a
/// reloaded checkpoint can be told apart from the first capture.
pub const CHECKPOINT_RESUMED: u64 = 1;

/// Integer-unit register file: general purpose registers, stack pointer,
/// program counter and status register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub gpr: [u64; NUM_GPRS],
    pub sp: u64,
    pub pc: u64,
    pub status: u64,
}

impl RegisterFile {
    pub fn return_value(&self) -> u64 {
        self.gpr[0]
    }

    pub fn set_return_value(&mut self, value: u64) {
        self.gpr[0] = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegSetType {
    /// Integer unit, handled by the agent itself.
    Iu,
    Fpu,
    Vector,
    Coprocessor(u8),
}

/// Register data exchanged through `get_registers`/`set_registers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegSetData {
    Iu(RegisterFile),
    Raw(Vec<u8>),
}

/// Handler for one auxiliary register class.
///
/// `save`/`load` move state between the hardware and the handler's saved
/// copy; `get`/`set` read and write the saved copy on behalf of the host.
pub trait RegisterSet: Send {
    fn reg_set_type(&self) -> RegSetType;

    /// Capture the live hardware registers of the system being suspended.
    fn save(&mut self);

    /// Restore the saved registers into the hardware before resuming.
    fn load(&mut self);

    fn get(&self) -> Vec<u8>;

    fn set(&mut self, data: &[u8]);
}

/// Append-only list of register-set handlers.
#[derive(Default)]
pub struct RegSetRegistry {
    sets: Vec<Box<dyn RegisterSet>>,
}

impl RegSetRegistry {
    pub fn new() -> Self {
        Self { sets: Vec::new() }
    }

    /// Append a handler. Registering the same type twice is not checked.
    pub fn add(&mut self, set: Box<dyn RegisterSet>) {
        log::debug!("Register set {:?} added", set.reg_set_type());
        self.sets.push(set);
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn types(&self) -> Vec<RegSetType> {
        self.sets.iter().map(|s| s.reg_set_type()).collect()
    }

    pub fn save_all(&mut self) {
        for set in &mut self.sets {
            set.save();
        }
    }

    pub fn load_all(&mut self) {
        for set in &mut self.sets {
            set.load();
        }
    }

    pub fn get(&self, reg_type: RegSetType) -> Result<Vec<u8>> {
        self.sets
            .iter()
            .find(|s| s.reg_set_type() == reg_type)
            .map(|s| s.get())
            .ok_or(WdbError::NotFound(reg_type))
    }

    pub fn set(&mut self, reg_type: RegSetType, data: &[u8]) -> Result<()> {
        let set = self
            .sets
            .iter_mut()
            .find(|s| s.reg_set_type() == reg_type)
            .ok_or(WdbError::NotFound(reg_type))?;
        set.set(data);
        Ok(())
    }
}
