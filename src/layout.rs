// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fixed physical layout of the platform as the monitor sees it. Everything here is a
//! compile-time constant; the pool and every table bound derive from these.

use enclave_pages::SECTION_SIZE;
use section_tracking::MEMORY_POOL_SECTION_NUM;
use static_assertions::const_assert;

/// Base of the physical section pool carved out for enclaves and host donations.
pub const MEMORY_POOL_START: u64 = 0xA000_0000;
/// One section per pool slot; the pool is exactly the table's capacity.
pub const MEMORY_POOL_SIZE: u64 = MEMORY_POOL_SECTION_NUM as u64 * SECTION_SIZE;
pub const MEMORY_POOL_END: u64 = MEMORY_POOL_START + MEMORY_POOL_SIZE;

// The pool window must start on a section boundary or every frame number derived from it
// would be off by the misalignment.
const_assert!(MEMORY_POOL_START % SECTION_SIZE == 0);

/// Size of the user payload region at the bottom of a new enclave's first section; the base
/// module image sits immediately above it.
pub const EUSR_MEM_SIZE: u64 = 0x10_0000;
/// Total initial memory of a new enclave: its first section.
pub const EMEM_SIZE: u64 = SECTION_SIZE;

const_assert!(EUSR_MEM_SIZE < EMEM_SIZE);

/// Virtual base an enclave's first section is linearly mapped at once its paging is up.
pub const ENCLAVE_VA_START: u64 = 0xC000_0000;

/// Entry point of the host supervisor the boot hart hands off to.
pub const HOST_ENTRY: u64 = 0x8020_0000;

/// Number of cores the monitor will accept calls from.
pub const MAX_CORES: usize = 8;
