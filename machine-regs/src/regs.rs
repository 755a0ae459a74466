// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! General purpose registers for RISC-V 64.

/// Array of rv64 general purpose registers with accessors/setters.
/// Used to save the state of the interrupted world while the other world runs.
/// `repr(C)` because it is referenced from the trap entry assembly.
#[derive(Default, Clone)]
#[repr(C)]
pub struct GeneralPurposeRegisters([u64; 32]);

/// Index of risc-v general purpose registers in `GeneralPurposeRegisters`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GprIndex {
    Zero = 0,
    RA,
    SP,
    GP,
    TP,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

impl GeneralPurposeRegisters {
    /// Returns the value of the given register.
    pub fn reg(&self, reg_index: GprIndex) -> u64 {
        self.0[reg_index as usize]
    }

    /// Sets the value of the given register.
    pub fn set_reg(&mut self, reg_index: GprIndex, val: u64) {
        if reg_index == GprIndex::Zero {
            return;
        }

        self.0[reg_index as usize] = val;
    }

    /// Returns the argument registers.
    /// This avoids many calls when a call handler needs all of the argument regs.
    pub fn a_regs(&self) -> &[u64] {
        &self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }

    /// Returns the argument registers as a mutable slice.
    pub fn a_regs_mut(&mut self) -> &mut [u64] {
        &mut self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }

    /// Zeroes every register. Used when an enclave's saved state is torn down so nothing
    /// leaks into the next occupant of the slot.
    pub fn clear(&mut self) {
        self.0 = [0; 32];
    }
}

/// Register state saved by the trap entry path on every trap into the monitor. The call
/// handlers mutate it in place; the trap exit path restores from it.
#[derive(Default, Clone)]
#[repr(C)]
pub struct TrapFrame {
    /// GPRs of the interrupted context.
    pub gprs: GeneralPurposeRegisters,
    /// mstatus at the time of the trap.
    pub mstatus: u64,
    /// PC of the trapping instruction.
    pub mepc: u64,
}
