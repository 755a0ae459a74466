// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Physical memory protection for enclave isolation. Each enclave may hold at most
//! `PMP_REGION_MAX` disjoint physical regions; the budget is the scarce resource the tiered
//! allocator works around. A region is enforced as a top-of-range (TOR) pair, so the eight
//! region slots exactly fill the sixteen PMP entries the hart implements.

use arrayvec::ArrayVec;
use enclave_pages::EnclaveId;
use section_tracking::{Region, SectionPool};

/// Maximum number of disjoint physical regions one enclave can have enforced at once.
pub const PMP_REGION_MAX: usize = 8;

// One TOR pair per region.
const PMP_ENTRY_COUNT: usize = 2 * PMP_REGION_MAX;

// pmpcfg permission and mode bits.
const PMP_R: u8 = 1 << 0;
const PMP_W: u8 = 1 << 1;
const PMP_X: u8 = 1 << 2;
const PMP_A_TOR: u8 = 0b01 << 3;
const PMP_A_NAPOT: u8 = 0b11 << 3;

/// Per-enclave bookkeeping of consumed region slots. Only tier-2 (fresh) allocations consume
/// a slot; adjacency and migration reuse existing regions.
#[derive(Clone, Default)]
pub struct PmpBudget {
    regions: ArrayVec<u64, PMP_REGION_MAX>,
}

impl PmpBudget {
    pub const fn new() -> Self {
        Self {
            regions: ArrayVec::new_const(),
        }
    }

    /// Returns how many region slots remain.
    pub fn free_slots(&self) -> usize {
        PMP_REGION_MAX - self.regions.len()
    }

    /// Consumes one slot for the region starting at `base`. False when exhausted.
    pub fn take(&mut self, base: u64) -> bool {
        self.regions.try_push(base).is_ok()
    }

    /// Releases every slot, for enclave teardown.
    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

/// One PMP entry: the address register value and its configuration byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PmpEntry {
    pub addr: u64,
    pub cfg: u8,
}

/// Encodes `regions` as TOR pairs: an address-only floor entry followed by a TOR entry
/// carrying the permissions. Regions beyond the hardware budget are ignored; the allocator
/// never creates more than the budget allows.
pub fn tor_entries(regions: &[Region]) -> ArrayVec<PmpEntry, PMP_ENTRY_COUNT> {
    let mut entries = ArrayVec::new();
    for r in regions.iter().take(PMP_REGION_MAX) {
        entries.push(PmpEntry {
            addr: r.start.base().bits() >> 2,
            cfg: 0,
        });
        entries.push(PmpEntry {
            addr: r.end().base().bits() >> 2,
            cfg: PMP_A_TOR | PMP_R | PMP_W | PMP_X,
        });
    }
    entries
}

/// The host-open configuration: a single NAPOT entry spanning the whole address space. Host
/// isolation from enclave memory is enforced by teardown-time zeroing and by the enclave
/// world owning the core while its secrets are live, not by the host's PMP view.
pub fn host_open_entry() -> PmpEntry {
    PmpEntry {
        addr: u64::MAX >> 10,
        cfg: PMP_A_NAPOT | PMP_R | PMP_W | PMP_X,
    }
}

/// Packs configuration bytes into the two rv64 configuration registers (entries 0-7 in
/// pmpcfg0, 8-15 in pmpcfg2).
pub fn pack_pmpcfg(entries: &[PmpEntry]) -> (u64, u64) {
    let mut cfg0 = 0u64;
    let mut cfg2 = 0u64;
    for (i, e) in entries.iter().enumerate().take(PMP_ENTRY_COUNT) {
        if i < 8 {
            cfg0 |= (e.cfg as u64) << (8 * i);
        } else {
            cfg2 |= (e.cfg as u64) << (8 * (i - 8));
        }
    }
    (cfg0, cfg2)
}

/// Collects the contiguous runs `owner` currently holds, in ascending order.
pub fn owned_regions(pool: &SectionPool, owner: EnclaveId) -> ArrayVec<Region, PMP_REGION_MAX> {
    let (base, count) = pool.span();
    let mut regions = ArrayVec::new();
    let mut head: Option<Region> = None;
    for i in 0..count as u64 {
        // Unwrap ok: frames derived from the pool's span stay inside it.
        let sfn = base.checked_add(i).unwrap();
        let owned = pool.owner_of(sfn).unwrap_or(None) == Some(owner);
        head = match (head, owned) {
            (None, true) => Some(Region { start: sfn, len: 1 }),
            (Some(mut r), true) => {
                r.len += 1;
                Some(r)
            }
            (Some(r), false) => {
                let _ = regions.try_push(r);
                None
            }
            (None, false) => None,
        };
    }
    if let Some(r) = head {
        let _ = regions.try_push(r);
    }
    regions
}

/// Programs the hart's PMP with the entries for an enclave's current regions.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn switch_to_enclave(pool: &SectionPool, owner: EnclaveId) {
    let entries = tor_entries(&owned_regions(pool, owner));
    program(&entries);
}

/// Reopens the hart for the host.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn switch_to_host() {
    program(&[host_open_entry()]);
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn program(entries: &[PmpEntry]) {
    use machine_regs::{pmpaddr_write, sfence_vma, CSR};
    use tock_registers::interfaces::Writeable;

    for i in 0..PMP_ENTRY_COUNT {
        pmpaddr_write(i, entries.get(i).map(|e| e.addr).unwrap_or(0));
    }
    let (cfg0, cfg2) = pack_pmpcfg(entries);
    CSR.pmpcfg0.set(cfg0);
    CSR.pmpcfg2.set(cfg2);
    // Stale translations may carry permissions from the previous configuration.
    sfence_vma();
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn switch_to_enclave(_pool: &SectionPool, _owner: EnclaveId) {}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn switch_to_host() {}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_pages::SectionFrame;

    #[test]
    fn budget_is_bounded() {
        let mut budget = PmpBudget::new();
        assert_eq!(budget.free_slots(), PMP_REGION_MAX);
        for i in 0..PMP_REGION_MAX as u64 {
            assert!(budget.take(i * 0x20_0000));
        }
        assert_eq!(budget.free_slots(), 0);
        assert!(!budget.take(0xdead_0000));

        budget.clear();
        assert_eq!(budget.free_slots(), PMP_REGION_MAX);
    }

    #[test]
    fn tor_pairs_bracket_regions() {
        let r = Region {
            start: SectionFrame::new(0x500),
            len: 2,
        };
        let entries = tor_entries(&[r]);
        assert_eq!(entries.len(), 2);
        // Floor entry carries no permissions, the TOR entry closes the range.
        assert_eq!(entries[0].addr, (0x500u64 << 21) >> 2);
        assert_eq!(entries[0].cfg, 0);
        assert_eq!(entries[1].addr, (0x502u64 << 21) >> 2);
        assert_eq!(entries[1].cfg, PMP_A_TOR | PMP_R | PMP_W | PMP_X);
    }

    #[test]
    fn cfg_packing_splits_at_entry_eight() {
        let regions: Vec<Region> = (0..5)
            .map(|i| Region {
                start: SectionFrame::new(0x500 + i * 4),
                len: 1,
            })
            .collect();
        let entries = tor_entries(&regions);
        assert_eq!(entries.len(), 10);
        let (cfg0, cfg2) = pack_pmpcfg(&entries);
        // Odd entries carry the TOR byte; entry 9 lands in the low byte pair of pmpcfg2.
        let tor = (PMP_A_TOR | PMP_R | PMP_W | PMP_X) as u64;
        assert_eq!((cfg0 >> 8) & 0xff, tor);
        assert_eq!((cfg2 >> 8) & 0xff, tor);
        assert_eq!(cfg0 & 0xff, 0);
    }

    #[test]
    fn host_entry_spans_everything() {
        let e = host_open_entry();
        assert_eq!(e.cfg, PMP_A_NAPOT | PMP_R | PMP_W | PMP_X);
        // All address bits set selects the largest NAPOT range.
        assert_eq!(e.addr, u64::MAX >> 10);
    }
}
