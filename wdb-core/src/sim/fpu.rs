//! Simulated floating-point register bank.

use super::{SimStep, SimTrace};
use crate::regs::{RegSetType, RegisterSet};
use std::sync::{Arc, Mutex, PoisonError};

pub const FPU_REGS: usize = 8;

/// Hardware FPU registers, shared between the simulated system and the handler.
pub type FpuBank = Arc<Mutex<[u64; FPU_REGS]>>;

/// [`RegisterSet`] for the simulated FPU. Registers travel as little-endian
/// 64-bit words.
pub struct SimFpu {
    hw: FpuBank,
    saved: [u64; FPU_REGS],
    trace: SimTrace,
}

impl SimFpu {
    pub fn new(hw: FpuBank, trace: SimTrace) -> Self {
        Self { hw, saved: [0; FPU_REGS], trace }
    }
}

impl RegisterSet for SimFpu {
    fn reg_set_type(&self) -> RegSetType {
        RegSetType::Fpu
    }

    fn save(&mut self) {
        self.saved = *self.hw.lock().unwrap_or_else(PoisonError::into_inner);
        self.trace.record(SimStep::FpuSaved);
    }

    fn load(&mut self) {
        *self.hw.lock().unwrap_or_else(PoisonError::into_inner) = self.saved;
        self.trace.record(SimStep::FpuLoaded);
    }

    fn get(&self) -> Vec<u8> {
        self.saved.iter().flat_map(|r| r.to_le_bytes()).collect()
    }

    /// Short input updates the leading registers only; excess bytes are ignored.
    fn set(&mut self, data: &[u8]) {
        for (reg, chunk) in self.saved.iter_mut().zip(data.chunks(8)) {
            let mut bytes = reg.to_le_bytes();
            bytes[..chunk.len()].copy_from_slice(chunk);
            *reg = u64::from_le_bytes(bytes);
        }
    }
}
