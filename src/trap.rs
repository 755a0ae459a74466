// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Machine trap entry. Each hart owns a `TrapStorage`: a trap stack with the saved-state
//! frame at its top. mscratch always points at the frame, so the vector can spill the
//! interrupted world with one CSR swap and hand the frame to the Rust handler.

use core::mem::MaybeUninit;

use machine_regs::{TrapFrame, CSR};
use m_mode_utils::abort::abort;
use m_mode_utils::print::*;
use tock_registers::interfaces::{Readable, Writeable};

use crate::ecall;
use crate::layout::MAX_CORES;
use crate::monitor::Monitor;
use crate::smp;

const TRAP_STACK_BYTES: usize = 16 * 1024;

#[repr(C, align(16))]
struct TrapStorage {
    stack: [u8; TRAP_STACK_BYTES],
    frame: TrapFrame,
}

// All-zero is a valid initial state for the frame and the stack.
static mut TRAP_STORAGE: [TrapStorage; MAX_CORES] =
    unsafe { MaybeUninit::zeroed().assume_init() };

// mcause exception codes the monitor handles.
const ECALL_FROM_U: u64 = 8;
const ECALL_FROM_S: u64 = 9;

core::arch::global_asm!(
    r#"
.attribute arch, "rv64imac"
.section .text
.align 2
.global _trap_vector
_trap_vector:
    // One swap gives us the frame pointer and parks the interrupted sp.
    csrrw sp, mscratch, sp
    sd x1, 8(sp)
    sd x3, 24(sp)
    sd x4, 32(sp)
    sd x5, 40(sp)
    sd x6, 48(sp)
    sd x7, 56(sp)
    sd x8, 64(sp)
    sd x9, 72(sp)
    sd x10, 80(sp)
    sd x11, 88(sp)
    sd x12, 96(sp)
    sd x13, 104(sp)
    sd x14, 112(sp)
    sd x15, 120(sp)
    sd x16, 128(sp)
    sd x17, 136(sp)
    sd x18, 144(sp)
    sd x19, 152(sp)
    sd x20, 160(sp)
    sd x21, 168(sp)
    sd x22, 176(sp)
    sd x23, 184(sp)
    sd x24, 192(sp)
    sd x25, 200(sp)
    sd x26, 208(sp)
    sd x27, 216(sp)
    sd x28, 224(sp)
    sd x29, 232(sp)
    sd x30, 240(sp)
    sd x31, 248(sp)
    csrr t0, mscratch
    sd t0, 16(sp)
    csrw mscratch, sp
    csrr t1, mstatus
    sd t1, 256(sp)
    csrr t2, mepc
    sd t2, 264(sp)
    // The frame sits at the top of this hart's trap storage, so the handler's stack
    // grows down into the storage's stack area.
    mv s1, sp
    mv a0, sp
    call handle_trap
    mv sp, s1
    ld t1, 256(sp)
    csrw mstatus, t1
    ld t2, 264(sp)
    csrw mepc, t2
    ld x1, 8(sp)
    ld x3, 24(sp)
    ld x4, 32(sp)
    ld x5, 40(sp)
    ld x6, 48(sp)
    ld x7, 56(sp)
    ld x8, 64(sp)
    ld x9, 72(sp)
    ld x10, 80(sp)
    ld x11, 88(sp)
    ld x12, 96(sp)
    ld x13, 104(sp)
    ld x14, 112(sp)
    ld x15, 120(sp)
    ld x16, 128(sp)
    ld x17, 136(sp)
    ld x18, 144(sp)
    ld x19, 152(sp)
    ld x20, 160(sp)
    ld x21, 168(sp)
    ld x22, 176(sp)
    ld x23, 184(sp)
    ld x24, 192(sp)
    ld x25, 200(sp)
    ld x26, 208(sp)
    ld x27, 216(sp)
    ld x28, 224(sp)
    ld x29, 232(sp)
    ld x30, 240(sp)
    ld x31, 248(sp)
    ld sp, 16(sp)
    mret
"#
);

/// Points this hart's mscratch at its trap frame and installs the vector.
pub fn install(hart_id: u64) {
    extern "C" {
        fn _trap_vector();
    }
    // Safe: each hart touches only its own storage slot, once, during bring-up.
    let frame = unsafe {
        core::ptr::addr_of_mut!(TRAP_STORAGE[hart_id as usize % MAX_CORES].frame)
    };
    CSR.mscratch.set(frame as u64);
    CSR.mtvec.set(_trap_vector as usize as u64);
}

#[no_mangle]
extern "C" fn handle_trap(frame: &mut TrapFrame) {
    let cause = CSR.mcause.get();
    match cause {
        ECALL_FROM_U | ECALL_FROM_S => {
            // Resume past the ecall instruction; world switches overwrite this anyway.
            frame.mepc += 4;
            ecall::handle_ecall(Monitor::get(), smp::this_hart_id(), frame);
        }
        _ => {
            println!(
                "unhandled trap: mcause {:#x} mepc {:#x}",
                cause, frame.mepc
            );
            abort();
        }
    }
}
