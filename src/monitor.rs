// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The monitor singleton: the section pool, the enclave table, the core-binding map and the
//! driver registry, created once at boot and shared by every hart's call handling.

use enclave_pages::EnclaveId;
use section_tracking::{EnclaveAnchors, EnclaveDirectory, SectionPool};
use spin::Once;

use crate::drv::DriverRegistry;
use crate::enclave::EnclaveTable;
use crate::smp::CoreMap;

pub struct Monitor {
    pub pool: SectionPool,
    pub enclaves: EnclaveTable,
    pub cores: CoreMap,
    pub drivers: DriverRegistry,
}

static MONITOR: Once<Monitor> = Once::new();

impl Monitor {
    /// Builds the monitor over the fixed physical pool window. Called once, by the boot
    /// hart, before any other hart takes traps.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn init() -> &'static Monitor {
        use crate::layout::{MEMORY_POOL_SIZE, MEMORY_POOL_START};
        use enclave_pages::{PageAddr, PageSize, RawAddr};

        MONITOR.call_once(|| {
            // Unwraps ok: the layout constants are statically section-aligned and sized.
            let base =
                PageAddr::with_alignment(RawAddr::machine(MEMORY_POOL_START), PageSize::Size2M)
                    .unwrap();
            // Safe: the pool window is carved out for the monitor by the platform layout
            // and nothing else touches it before this point.
            let pool = unsafe { SectionPool::new(base, MEMORY_POOL_SIZE) }.unwrap();
            Monitor {
                pool,
                enclaves: EnclaveTable::new(),
                cores: CoreMap::new(),
                drivers: DriverRegistry::new(),
            }
        })
    }

    /// Returns the monitor, spinning until the boot hart has built it.
    pub fn get() -> &'static Monitor {
        MONITOR.wait()
    }

    /// The allocator's view of this monitor for a call arriving on `hart_id`.
    pub fn directory(&self, hart_id: u64) -> DirectoryView<'_> {
        DirectoryView {
            monitor: self,
            hart_id,
        }
    }

    /// Builds a monitor over leaked host memory for unit tests.
    #[cfg(test)]
    pub fn new_in_test(sections: usize) -> Monitor {
        use enclave_pages::{PageAddr, PageSize, RawAddr, SECTION_SIZE};

        let backing = vec![0u8; (sections + 1) * SECTION_SIZE as usize];
        let ptr = backing.as_ptr();
        let aligned = unsafe {
            // Not safe - just a test
            ptr.add(ptr.align_offset(SECTION_SIZE as usize))
        };
        std::mem::forget(backing);
        let base =
            PageAddr::with_alignment(RawAddr::machine(aligned as u64), PageSize::Size2M).unwrap();
        let pool =
            unsafe { SectionPool::new(base, sections as u64 * SECTION_SIZE) }.unwrap();
        Monitor {
            pool,
            enclaves: EnclaveTable::new(),
            cores: CoreMap::new(),
            drivers: DriverRegistry::new(),
        }
    }
}

/// Adapts the monitor's tables to the allocator's `EnclaveDirectory` seam for one call.
pub struct DirectoryView<'a> {
    monitor: &'a Monitor,
    hart_id: u64,
}

impl EnclaveDirectory for DirectoryView<'_> {
    fn with_anchors<R>(
        &self,
        id: EnclaveId,
        f: impl FnOnce(&mut EnclaveAnchors) -> R,
    ) -> Option<R> {
        self.monitor.enclaves.with_anchors(id, f)
    }

    fn install_satp(&self, id: EnclaveId, satp: u64) {
        // Resident enclaves see the new root immediately; everyone else on their next
        // context restore.
        if self.monitor.cores.enclave_on(self.hart_id) == Some(id) {
            write_live_satp(satp);
        } else {
            self.monitor.enclaves.set_saved_satp(id, satp);
        }
    }

    fn pmp_slots_free(&self, id: EnclaveId) -> usize {
        self.monitor.enclaves.pmp_slots_free(id)
    }

    fn take_pmp_slot(&self, id: EnclaveId, region_base: u64) -> bool {
        self.monitor.enclaves.take_pmp_slot(id, region_base)
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn write_live_satp(satp: u64) {
    use machine_regs::{sfence_vma, CSR};
    use tock_registers::interfaces::Writeable;
    CSR.satp.set(satp);
    sfence_vma();
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn write_live_satp(_satp: u64) {
    unimplemented!("live satp write on non-riscv host")
}
