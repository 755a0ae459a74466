// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Typed addresses for the enclave monitor
//!
//! - `RawAddr<AS>` tags a raw 64-bit address with the address space it belongs to, keeping
//!   machine-physical and enclave-virtual addresses from mixing.
//! - `PageAddr<AS>` is a `RawAddr` known to be aligned to a page boundary.
//! - `SectionFrame` is the index of a section, the coarse granule of ownership and migration.
//! - `EnclaveId` is a validated enclave slot number.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod address;
mod owner;
mod section;

pub use address::*;
pub use owner::{AddressSpace, EnclaveId, EnclaveVirt, MachinePhys, NUM_ENCLAVE};
pub use section::{LinearOffset, SectionFrame, SECTION_SHIFT, SECTION_SIZE};
