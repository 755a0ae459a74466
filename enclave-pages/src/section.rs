// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::{EnclaveVirt, MachinePageAddr, MachinePhys, MachinePhysAddr, PageSize, RawAddr};

/// Sections are the granule at which physical memory is owned, protected and migrated.
pub const SECTION_SHIFT: u64 = 21;
pub const SECTION_SIZE: u64 = 1 << SECTION_SHIFT;

/// The frame number of a section: its base physical address right-shifted by `SECTION_SHIFT`.
/// Plays the same role for sections that a PFN plays for pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SectionFrame(u64);

impl SectionFrame {
    /// Creates a `SectionFrame` from raw frame bits.
    pub fn new(bits: u64) -> Self {
        SectionFrame(bits)
    }

    /// Returns the frame of the section containing `addr`.
    pub fn containing(addr: MachinePhysAddr) -> Self {
        SectionFrame(addr.bits() >> SECTION_SHIFT)
    }

    /// Returns the raw frame bits.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Returns the base address of the section.
    pub fn base(&self) -> MachinePageAddr {
        // Unwrap ok: a left shift by SECTION_SHIFT is always section (and thus page) aligned.
        MachinePageAddr::with_alignment(
            RawAddr::machine(self.0 << SECTION_SHIFT),
            PageSize::Size2M,
        )
        .unwrap()
    }

    /// Returns the frame `n` sections above this one, or `None` on overflow.
    pub fn checked_add(&self, n: u64) -> Option<Self> {
        self.0.checked_add(n).map(SectionFrame)
    }

    /// Returns the frame `n` sections below this one, or `None` on underflow.
    pub fn checked_sub(&self, n: u64) -> Option<Self> {
        self.0.checked_sub(n).map(SectionFrame)
    }
}

/// The linear VA->PA relationship an enclave's direct mapping follows. The enclave registers
/// the physical location of the cell holding this offset; the monitor reads it only while the
/// enclave has paging enabled, which is the single place virtual and physical addresses are
/// allowed to convert.
#[derive(Copy, Clone, Debug)]
pub struct LinearOffset(u64);

impl LinearOffset {
    /// Creates a `LinearOffset` where `va = pa + offset` (wrapping).
    pub fn new(offset: u64) -> Self {
        LinearOffset(offset)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Translates an enclave-virtual address in the linear range to its physical address.
    pub fn phys_of(&self, va: RawAddr<EnclaveVirt>) -> MachinePhysAddr {
        RawAddr::machine(va.bits().wrapping_sub(self.0))
    }

    /// Translates a physical address to the enclave-virtual address that maps it linearly.
    pub fn virt_of(&self, pa: MachinePhysAddr) -> RawAddr<EnclaveVirt> {
        RawAddr::enclave(pa.bits().wrapping_add(self.0))
    }

    /// Returns the offset adjusted for a relocation of the linearly-mapped range by
    /// `delta` bytes: the VA stays fixed while the PA moves, so the offset absorbs the delta.
    pub fn relocated_by(&self, delta: u64) -> Self {
        LinearOffset(self.0.wrapping_sub(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_of_addr() {
        let addr = RawAddr::machine(0x8030_1234);
        let sfn = SectionFrame::containing(addr);
        assert_eq!(sfn.bits(), 0x8030_1234 >> SECTION_SHIFT);
        assert!(sfn.base().bits() <= addr.bits());
        assert!(addr.bits() < sfn.base().bits() + SECTION_SIZE);
    }

    #[test]
    fn frame_arithmetic() {
        let sfn = SectionFrame::new(4);
        assert_eq!(sfn.checked_add(2), Some(SectionFrame::new(6)));
        assert_eq!(sfn.checked_sub(4), Some(SectionFrame::new(0)));
        assert_eq!(sfn.checked_sub(5), None);
    }

    #[test]
    fn linear_translation() {
        let off = LinearOffset::new(0xffff_ffc0_0000_0000u64.wrapping_sub(0x8020_0000));
        let va = RawAddr::enclave(0xffff_ffc0_0000_1000);
        assert_eq!(off.phys_of(va).bits(), 0x8020_1000);
        assert_eq!(off.virt_of(RawAddr::machine(0x8020_1000)).bits(), va.bits());

        // Moving the backing memory up by one section pulls the offset down by the same amount.
        let moved = off.relocated_by(SECTION_SIZE);
        assert_eq!(moved.phys_of(va).bits(), 0x8020_1000 + SECTION_SIZE);
    }
}
