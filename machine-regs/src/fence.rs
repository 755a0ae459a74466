// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// Low-level TLB and cache management operations. Every page-table or physical-content
/// mutation that could be observed stale by the affected core must be followed by one of
/// these. On non-riscv hosts they compile to no-ops; host builds exist only to run unit
/// tests against memory the host is coherent with.

/// Executes an SFENCE.VMA instruction, invalidating all cached address translations.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn sfence_vma() {
    // Safety: SFENCE.VMA's behavior is well-defined and its only side effect is to invalidate
    // address translation caches.
    unsafe {
        core::arch::asm!("sfence.vma");
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn sfence_vma() {}

/// Writes back the L1 D-cache. The target core implements the custom CFLUSH.D.L1 encoding;
/// the ranged variants of these operations are not available, so the whole cache is flushed.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn flush_dcache() {
    // cflush.d.l1 zero
    unsafe {
        core::arch::asm!(".word 0xFC000073");
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn flush_dcache() {}

/// Discards the L1 D-cache without write-back. Used after a section's contents have moved so
/// stale lines for the old location can never be written back over a new owner's data.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn discard_dcache() {
    // cdiscard.d.l1 zero
    unsafe {
        core::arch::asm!(".word 0xFC200073");
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn discard_dcache() {}
