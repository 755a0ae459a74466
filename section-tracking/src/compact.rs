// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use enclave_pages::SectionFrame;

use crate::{migrate, EnclaveDirectory, Error, Result, SectionPool};

fn is_enclave_owned(pool: &SectionPool, sfn: SectionFrame) -> Result<bool> {
    Ok(pool.owner_of(sfn)?.map(|id| !id.is_host()).unwrap_or(false))
}

/// Best-effort whole-pool defragmentation: a low cursor walks up to the next free section, a
/// high cursor walks down to the last enclave-owned one, and the high section migrates into
/// the low slot until the cursors cross. The pass never increases the number of free-to-owned
/// boundaries and never changes any owner's section count; host sections stay where they are
/// (they are packed at the top and carry no patchable mappings).
pub fn compact<D: EnclaveDirectory>(pool: &SectionPool, dir: &D) -> Result<()> {
    let (base, count) = pool.span();
    let mut low = 0usize;
    let mut high = count;

    loop {
        while low < count && pool.owner_of(frame(base, low))?.is_some() {
            low += 1;
        }
        while high > 0 && !is_enclave_owned(pool, frame(base, high - 1))? {
            high -= 1;
        }
        // Stop once the free slot sits at or above the candidate section; moving upward
        // would create fragmentation instead of removing it.
        if low >= count || high == 0 || low >= high - 1 {
            return Ok(());
        }
        migrate(pool, dir, frame(base, high - 1), frame(base, low))?;
        low += 1;
        high -= 1;
    }
}

fn frame(base: SectionFrame, index: usize) -> SectionFrame {
    // Unwrap ok: indices come from the pool's span.
    base.checked_add(index as u64).unwrap()
}
