// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Test fixture: a tiny Sv39 tree built in leaked, page-aligned host memory so the walk and
//! patch routines can run against real tables.

use enclave_pages::{EnclaveVirtAddr, MachinePageAddr, PageAddr, PageSize, RawAddr};

use crate::pte::{Pte, PteFieldBit};
use crate::walk::ENTRIES_PER_TABLE;

const PAGE_BYTES: usize = PageSize::Size4k as usize;
// Table pages come from the low half of the fixture arena, data pages from the high half.
const ARENA_PAGES: usize = 64;
const DATA_PAGE_BASE: usize = 32;

pub struct TestTables {
    base: u64,
    next_table_page: usize,
}

impl TestTables {
    /// Builds an arena with an empty root table in its first page. Leaks the backing memory,
    /// which is fine for tests.
    pub fn new() -> Self {
        let backing = vec![0u8; PAGE_BYTES * (ARENA_PAGES + 1)];
        let ptr = backing.as_ptr();
        let aligned = unsafe {
            // Not safe - just a test
            ptr.add(ptr.align_offset(PAGE_BYTES))
        };
        std::mem::forget(backing);
        Self {
            base: aligned as u64,
            next_table_page: 1,
        }
    }

    pub fn root(&self) -> MachinePageAddr {
        PageAddr::new(RawAddr::machine(self.base)).unwrap()
    }

    /// Returns the address of the `i`th data page in the arena.
    pub fn data_page(&self, i: usize) -> MachinePageAddr {
        assert!(DATA_PAGE_BASE + i < ARENA_PAGES);
        PageAddr::new(RawAddr::machine(
            self.base + ((DATA_PAGE_BASE + i) * PAGE_BYTES) as u64,
        ))
        .unwrap()
    }

    fn alloc_table_page(&mut self) -> u64 {
        assert!(self.next_table_page < DATA_PAGE_BASE, "fixture out of table pages");
        let addr = self.base + (self.next_table_page * PAGE_BYTES) as u64;
        self.next_table_page += 1;
        addr
    }

    fn entry(table: u64, index: usize) -> *mut Pte {
        assert!(index < ENTRIES_PER_TABLE);
        unsafe { (table as *mut Pte).add(index) }
    }

    /// Installs a 4kB RWX mapping va -> pa, creating intermediate tables as needed.
    pub fn map(&mut self, va: EnclaveVirtAddr, pa: MachinePageAddr) {
        let mut table = self.base;
        for level in (1..3).rev() {
            let index = ((va.bits() >> (12 + 9 * level)) & 0x1ff) as usize;
            let pte = Self::entry(table, index);
            let next = unsafe {
                if !(*pte).valid() {
                    let page = self.alloc_table_page();
                    core::ptr::write(
                        pte,
                        Pte::new_for_test(((page >> 12) << 10) | PteFieldBit::Valid.mask()),
                    );
                    page
                } else {
                    (*pte).pfn().bits() << 12
                }
            };
            table = next;
        }
        let index = ((va.bits() >> 12) & 0x1ff) as usize;
        let bits = ((pa.bits() >> 12) << 10)
            | PteFieldBit::Valid.mask()
            | PteFieldBit::Read.mask()
            | PteFieldBit::Write.mask()
            | PteFieldBit::Execute.mask();
        unsafe {
            core::ptr::write(Self::entry(table, index), Pte::new_for_test(bits));
        }
    }

    /// Reads back the physical address `va` currently translates to, `None` if unmapped.
    pub fn translate(&self, va: EnclaveVirtAddr) -> Option<MachinePageAddr> {
        unsafe { crate::walk::leaf_entry_for(self.root(), va) }.map(|l| l.page_addr())
    }
}
