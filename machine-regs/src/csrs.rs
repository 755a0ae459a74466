// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Tock Register interface for using CSR registers.

use core::marker::PhantomData;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::RegisterLongName;

pub use tock_registers::interfaces::ReadWriteable;
pub use tock_registers::LocalRegisterCopy;

// Machine status.
register_bitfields![u64,
    pub mstatus [
        // Enable or disable all interrupts in S-mode.
        sie OFFSET(1) NUMBITS(1) [],
        // Enable or disable all interrupts in M-mode.
        mie OFFSET(3) NUMBITS(1) [],
        // Indicates whether supervisor interrupts were enabled prior to trapping.
        spie OFFSET(5) NUMBITS(1) [],
        // Indicates whether machine interrupts were enabled prior to trapping.
        mpie OFFSET(7) NUMBITS(1) [],
        // Privilege level the hart was executing before entering M-mode.
        mpp OFFSET(11) NUMBITS(2) [
            User = 0,
            Supervisor = 1,
            Machine = 3,
        ],
        // Modify PRiVilege: loads/stores execute with the translation and
        // protection of the privilege mode in mpp.
        mprv OFFSET(17) NUMBITS(1) [],
    ]
];

// Supervisor status (the normal-world copy the monitor saves and restores).
register_bitfields![u64,
    pub sstatus [
        sie OFFSET(1) NUMBITS(1) [],
        spie OFFSET(5) NUMBITS(1) [],
        spp OFFSET(8) NUMBITS(1) [
            User = 0,
            Supervisor = 1,
        ],
        sum OFFSET(18) NUMBITS(1) [],
        mxr OFFSET(19) NUMBITS(1) [],
    ]
];

// Supervisor address translation and protection.
register_bitfields![u64,
    pub satp [
        ppn OFFSET(0) NUMBITS(44) [],
        asid OFFSET(44) NUMBITS(16) [],
        mode OFFSET(60) NUMBITS(4) [
            Bare = 0,
            Sv39 = 8,
            Sv48 = 9,
        ],
    ]
];

// PMP entry configuration, one byte per entry, packed into pmpcfg0.
register_bitfields![u64,
    pub pmpcfg [
        read OFFSET(0) NUMBITS(1) [],
        write OFFSET(1) NUMBITS(1) [],
        exec OFFSET(2) NUMBITS(1) [],
        addr_mode OFFSET(3) NUMBITS(2) [
            Off = 0,
            Tor = 1,
            Na4 = 2,
            Napot = 3,
        ],
        lock OFFSET(7) NUMBITS(1) [],
    ]
];

pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MEDELEG: u16 = 0x302;
pub const CSR_MIDELEG: u16 = 0x303;
pub const CSR_MIE: u16 = 0x304;
pub const CSR_MTVEC: u16 = 0x305;
pub const CSR_MSCRATCH: u16 = 0x340;
pub const CSR_MEPC: u16 = 0x341;
pub const CSR_MCAUSE: u16 = 0x342;
pub const CSR_PMPCFG0: u16 = 0x3a0;
pub const CSR_PMPCFG2: u16 = 0x3a2;
pub const CSR_PMPADDR0: u16 = 0x3b0;
pub const CSR_MHARTID: u16 = 0xf14;

pub const CSR_SSTATUS: u16 = 0x100;
pub const CSR_SIE: u16 = 0x104;
pub const CSR_STVEC: u16 = 0x105;
pub const CSR_SSCRATCH: u16 = 0x140;
pub const CSR_SEPC: u16 = 0x141;
pub const CSR_SATP: u16 = 0x180;

/// Read/Write CSR. The `V` parameter is the CSR address.
#[derive(Copy, Clone)]
pub struct ReadWriteRiscvCsr<R: RegisterLongName, const V: u16> {
    associated_register: PhantomData<R>,
}

impl<R: RegisterLongName, const V: u16> ReadWriteRiscvCsr<R, V> {
    pub const fn new() -> Self {
        ReadWriteRiscvCsr {
            associated_register: PhantomData,
        }
    }
}

impl<R: RegisterLongName, const V: u16> Readable for ReadWriteRiscvCsr<R, V> {
    type T = u64;
    type R = R;

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[inline]
    fn get(&self) -> u64 {
        let r: u64;
        unsafe {
            core::arch::asm!("csrr {rd}, {csr}", rd = out(reg) r, csr = const V);
        }
        r
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn get(&self) -> u64 {
        unimplemented!("reading RISC-V CSR {}", V)
    }
}

impl<R: RegisterLongName, const V: u16> Writeable for ReadWriteRiscvCsr<R, V> {
    type T = u64;
    type R = R;

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[inline]
    fn set(&self, val_to_set: u64) {
        unsafe {
            core::arch::asm!("csrw {csr}, {rs}", rs = in(reg) val_to_set, csr = const V);
        }
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn set(&self, _val_to_set: u64) {
        unimplemented!("writing RISC-V CSR {}", V)
    }
}

/// The CSRs the monitor touches. PMP address registers are indexed dynamically in the pmp
/// module via `pmpaddr_write`; only entry 0's address is named here.
pub struct CSR {
    pub mstatus: ReadWriteRiscvCsr<mstatus::Register, CSR_MSTATUS>,
    pub medeleg: ReadWriteRiscvCsr<sstatus::Register, CSR_MEDELEG>,
    pub mtvec: ReadWriteRiscvCsr<sstatus::Register, CSR_MTVEC>,
    pub mscratch: ReadWriteRiscvCsr<sstatus::Register, CSR_MSCRATCH>,
    pub mepc: ReadWriteRiscvCsr<sstatus::Register, CSR_MEPC>,
    pub mcause: ReadWriteRiscvCsr<sstatus::Register, CSR_MCAUSE>,
    pub mhartid: ReadWriteRiscvCsr<sstatus::Register, CSR_MHARTID>,
    pub sstatus: ReadWriteRiscvCsr<sstatus::Register, CSR_SSTATUS>,
    pub sie: ReadWriteRiscvCsr<sstatus::Register, CSR_SIE>,
    pub stvec: ReadWriteRiscvCsr<sstatus::Register, CSR_STVEC>,
    pub sscratch: ReadWriteRiscvCsr<sstatus::Register, CSR_SSCRATCH>,
    pub satp: ReadWriteRiscvCsr<satp::Register, CSR_SATP>,
    pub pmpcfg0: ReadWriteRiscvCsr<pmpcfg::Register, CSR_PMPCFG0>,
    pub pmpcfg2: ReadWriteRiscvCsr<pmpcfg::Register, CSR_PMPCFG2>,
}

pub const CSR: &CSR = &CSR {
    mstatus: ReadWriteRiscvCsr::new(),
    medeleg: ReadWriteRiscvCsr::new(),
    mtvec: ReadWriteRiscvCsr::new(),
    mscratch: ReadWriteRiscvCsr::new(),
    mepc: ReadWriteRiscvCsr::new(),
    mcause: ReadWriteRiscvCsr::new(),
    mhartid: ReadWriteRiscvCsr::new(),
    sstatus: ReadWriteRiscvCsr::new(),
    sie: ReadWriteRiscvCsr::new(),
    stvec: ReadWriteRiscvCsr::new(),
    sscratch: ReadWriteRiscvCsr::new(),
    satp: ReadWriteRiscvCsr::new(),
    pmpcfg0: ReadWriteRiscvCsr::new(),
    pmpcfg2: ReadWriteRiscvCsr::new(),
};

/// Encodes a satp value for an Sv39 root at `root_ppn`. Pure bit math so relocation code can
/// recompute a saved satp without touching the live register.
pub fn encode_satp_sv39(root_ppn: u64) -> u64 {
    (8u64 << 60) | (root_ppn & ((1 << 44) - 1))
}

/// Writes the `n`th PMP address register. The pmpaddr CSRs are contiguous from 0x3b0 and CSR
/// numbers are instruction immediates, so the index has to be dispatched statically.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn pmpaddr_write(n: usize, val: u64) {
    macro_rules! pmpaddr_case {
        ($($i:literal, $name:literal);*) => {
            match n {
                $($i => unsafe {
                    core::arch::asm!(concat!("csrw ", $name, ", {rs}"), rs = in(reg) val);
                },)*
                _ => (),
            }
        };
    }
    pmpaddr_case!(
        0, "pmpaddr0"; 1, "pmpaddr1"; 2, "pmpaddr2"; 3, "pmpaddr3";
        4, "pmpaddr4"; 5, "pmpaddr5"; 6, "pmpaddr6"; 7, "pmpaddr7";
        8, "pmpaddr8"; 9, "pmpaddr9"; 10, "pmpaddr10"; 11, "pmpaddr11";
        12, "pmpaddr12"; 13, "pmpaddr13"; 14, "pmpaddr14"; 15, "pmpaddr15"
    );
}

/// Writes the `n`th PMP address register.
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn pmpaddr_write(n: usize, _val: u64) {
    unimplemented!("writing RISC-V CSR pmpaddr{}", n)
}
