// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#![no_std]
#![allow(missing_docs)]

//! Crate for the machine-mode register state the monitor saves, restores and rewrites.
//! regs - RV64 General Purpose Registers (GPRs), 0-31, and the machine trap frame.
//! csrs - M-mode and normal-world S-mode CSRs.
//! fence - TLB and D-cache maintenance.
//! mprv - loads through the caller's address translation (MSTATUS.MPRV).

mod csrs;
mod fence;
mod mprv;
mod regs;

pub use csrs::*;
pub use fence::*;
pub use mprv::*;
pub use regs::*;

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;
