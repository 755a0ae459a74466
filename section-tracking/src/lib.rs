// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Section ownership tracking and allocation for the enclave monitor
//!
//! Physical memory handed to enclaves is managed at section granularity (2MB). This crate
//! owns the section pool - the table recording which context owns each section - and the
//! operations that redistribute sections while keeping every live mapping correct:
//!
//! - `SectionPool` - the fixed-size ownership table and its region queries.
//! - `allocate_section` - the four-tier allocation policy: adjacency reuse, fresh allocation
//!   under the PMP budget, migration-based defragmentation, and one compaction retry.
//! - `migrate` - moves one section's contents and ownership to a free slot and repairs the
//!   owning enclave's page-table tree, linear leaf mappings and inverse map in place.
//! - `compact` - best-effort whole-pool defragmentation built on `migrate`.
//!
//! The callers' enclave state is reached through the `EnclaveDirectory` trait so that the
//! pool, the allocator and their tests stay independent of the monitor's context table.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod alloc;
mod compact;
mod directory;
mod migrate;
mod pool;
#[cfg(test)]
mod stubs;

pub use crate::alloc::{allocate_section, allocate_section_for_host};
pub use crate::compact::compact;
pub use crate::directory::{EnclaveAnchors, EnclaveDirectory};
pub use crate::migrate::migrate;
pub use crate::pool::{Region, SectionPool, MEMORY_POOL_SECTION_NUM};

use enclave_pages::SectionFrame;

/// Errors from section tracking operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool base or size isn't section aligned.
    MisalignedPool,
    /// The pool describes more sections than the fixed table can hold, or none at all.
    InvalidPoolSize,
    /// The section frame doesn't fall inside the pool.
    InvalidSection(SectionFrame),
    /// Attempt to claim or migrate onto a section that already has an owner.
    SectionOwned(SectionFrame),
    /// The source of a migration has no owner.
    SectionFree(SectionFrame),
    /// Host sections carry no patchable mappings and are never migrated.
    HostOwned(SectionFrame),
    /// The owning enclave has no context in the directory.
    MissingContext,
    /// The enclave registered a page-table root the monitor can't use.
    BadRootPointer,
    /// No allocation tier could produce a section, even after compaction.
    OutOfMemory,
}

/// Holds the result of section tracking operations.
pub type Result<T> = core::result::Result<T, Error>;
