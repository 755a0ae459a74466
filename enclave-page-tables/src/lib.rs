// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Page-table repair for relocated enclave memory
//!
//! Enclaves own their page tables; the monitor never builds mappings for them. What the
//! monitor does do is move physical sections out from under live mappings, and afterwards
//! every affected entry must point at the page's new home. This crate holds the pieces of
//! that repair:
//!
//! - `Pte`/`LeafPte` - the Sv39 entry representation, referenced in place.
//! - `leaf_entry_for()` - pure lookup of the leaf entry mapping a virtual address.
//! - `patch_tree()`/`patch_leaf()`/`patch_linear_run()` - targeted rewrites of physical
//!   frame fields after a relocation.
//! - `InverseMap` - the enclave-registered table from physical base to the virtual range
//!   mapped there, consulted so relocation doesn't need an exhaustive tree walk.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod inverse_map;
mod patch;
mod pte;
#[cfg(test)]
mod tests;
mod walk;

pub use inverse_map::{InverseMap, InverseMapEntry, INVERSE_MAP_ENTRY_NUM};
pub use patch::{patch_leaf, patch_linear_run, patch_tree};
pub use pte::{Pte, PteFieldBit};
pub use walk::{leaf_entry_for, LeafPte, ENTRIES_PER_TABLE};
