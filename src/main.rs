// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! custos - a machine-mode enclave monitor for RISC-V.
//!
//! The monitor partitions a fixed physical pool into sections owned by mutually
//! distrusting enclaves, multiplexes each core between the host supervisor and one
//! enclave, and relocates sections under live mappings when memory runs tight. It is
//! reached only through the EBI vendor call interface.
//!
//! The binary targets riscv64 machine mode; building for the development host produces a
//! stub whose only purpose is carrying the unit tests.
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_main)]

mod drv;
mod ecall;
mod enclave;
mod layout;
mod monitor;
mod pmp;
mod smp;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod trap;

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
use m_mode_utils::print::*;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod boot {
    use m_mode_utils::abort::abort;
    use m_mode_utils::print::*;
    use machine_regs::{mstatus, LocalRegisterCopy, CSR};
    use tock_registers::interfaces::{Readable, Writeable};

    use crate::layout::{HOST_ENTRY, MEMORY_POOL_END, MEMORY_POOL_START};
    use crate::monitor::Monitor;
    use crate::trap;

    // Per-hart boot stacks, carved out below _boot_stack_top by hart id.
    const BOOT_STACK_BYTES: usize = 4 * 4096;
    const BOOT_STACK_TOTAL: usize = BOOT_STACK_BYTES * crate::layout::MAX_CORES;

    core::arch::global_asm!(
        r#"
.attribute arch, "rv64imac"
.section .text.start
.global _start
_start:
    csrr a0, mhartid
    la sp, _boot_stack_top
    li t0, {stack_bytes}
    mul t1, a0, t0
    sub sp, sp, t1
    call kernel_init
1:
    wfi
    j 1b

.section .bss
.align 4
_boot_stack:
    .skip {stack_total}
_boot_stack_top:
"#,
        stack_bytes = const BOOT_STACK_BYTES,
        stack_total = const BOOT_STACK_TOTAL,
    );

    #[no_mangle]
    extern "C" fn kernel_init(hart_id: u64) -> ! {
        if hart_id == 0 {
            Monitor::init();
            println!(
                "custos: section pool {:#x}..{:#x}",
                MEMORY_POOL_START, MEMORY_POOL_END
            );
        }
        // Secondary harts wait here until the boot hart has built the monitor.
        let _ = Monitor::get();
        trap::install(hart_id);
        launch_host(hart_id)
    }

    // Drops to the host supervisor's entry point in S-mode. The monitor stays resident
    // behind mtvec, waiting for the first privileged call.
    fn launch_host(hart_id: u64) -> ! {
        let mut ms: LocalRegisterCopy<u64, mstatus::Register> =
            LocalRegisterCopy::new(CSR.mstatus.get());
        ms.modify(mstatus::mpp::Supervisor);
        ms.modify(mstatus::mpie::SET);
        CSR.mstatus.set(ms.get());
        // Safe: hands the hart to the host kernel; this function never returns.
        unsafe {
            core::arch::asm!(
                "csrw mepc, {entry}",
                "mv a0, {hart}",
                "mret",
                entry = in(reg) HOST_ENTRY,
                hart = in(reg) hart_id,
                options(noreturn)
            );
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        println!("panic : {:?}", info);
        abort()
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {
    // The monitor only runs as riscv64 machine-mode firmware; this build carries the
    // unit tests.
    m_mode_utils::println!("custos: host build, nothing to run");
}
