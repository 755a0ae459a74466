// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use enclave_pages::{EnclaveId, EnclaveVirtAddr, MachinePageAddr, RawAddr};

use crate::{compact, migrate, EnclaveDirectory, Error, Result, SectionPool};

/// Allocates one section for `owner`, to be mapped at `va`. Tiers, each tried only when the
/// previous one found nothing:
///
/// 1. A free section physically adjacent to one the enclave already owns, keeping its
///    footprint contiguous without spending protection resources.
/// 2. A fresh section from the middle of the largest free run, spending one of the
///    enclave's PMP slots. Picking the middle keeps the pool's edges unfragmented.
/// 3. Migrating the enclave's smallest owned run into a strictly larger free run and taking
///    the section just past the moved block: contiguity without a new PMP slot.
/// 4. One global compaction pass, then tier 3 exactly once more.
///
/// The returned section is zeroed and recorded as `{owner, va}`. Failure after the
/// compaction retry is a hard out-of-memory result; nothing has changed for the caller.
pub fn allocate_section<D: EnclaveDirectory>(
    pool: &SectionPool,
    dir: &D,
    owner: EnclaveId,
    va: EnclaveVirtAddr,
) -> Result<MachinePageAddr> {
    if owner.is_host() {
        return allocate_section_for_host(pool, dir);
    }

    // Tier 1: grow an existing run.
    if let Some(sfn) = pool.free_neighbor_of(owner) {
        pool.claim(sfn, owner, va)?;
        return Ok(sfn.base());
    }

    // Tier 2: fresh region, if the enclave can still afford to map one.
    if dir.pmp_slots_free(owner) > 0 {
        if let Some(region) = pool.largest_free_region() {
            // Unwrap ok: the middle of an in-pool region is an in-pool frame.
            let sfn = region.start.checked_add((region.len / 2) as u64).unwrap();
            if dir.take_pmp_slot(owner, sfn.base().bits()) {
                pool.claim(sfn, owner, va)?;
                return Ok(sfn.base());
            }
        }
    }

    // Tier 3: trade fragmentation for contiguity.
    if let Some(addr) = migrate_and_extend(pool, dir, owner, va)? {
        return Ok(addr);
    }

    // Tier 4: compact once, retry once.
    compact(pool, dir)?;
    if let Some(addr) = migrate_and_extend(pool, dir, owner, va)? {
        return Ok(addr);
    }
    Err(Error::OutOfMemory)
}

// Moves the enclave's smallest owned run into a free run with room to spare, then claims the
// section just past the moved block. Returns `Ok(None)` when no suitable pair of runs exists.
fn migrate_and_extend<D: EnclaveDirectory>(
    pool: &SectionPool,
    dir: &D,
    owner: EnclaveId,
    va: EnclaveVirtAddr,
) -> Result<Option<MachinePageAddr>> {
    let smallest = match pool.smallest_region_owned_by(owner) {
        Some(r) => r,
        None => return Ok(None),
    };
    let avail = match pool.free_region_larger_than(smallest.len) {
        Some(r) => r,
        None => return Ok(None),
    };
    // Move section by section in ascending order so the run's internal layout survives.
    for i in 0..smallest.len as u64 {
        // Unwraps ok: both runs lie inside the pool.
        migrate(
            pool,
            dir,
            smallest.start.checked_add(i).unwrap(),
            avail.start.checked_add(i).unwrap(),
        )?;
    }
    let sfn = avail.start.checked_add(smallest.len as u64).unwrap();
    pool.claim(sfn, owner, va)?;
    Ok(Some(sfn.base()))
}

/// Allocates one section for the host. Host sections are taken from the top of the pool
/// downward so host memory stays distinguishable from enclave memory during bring-up; an
/// enclave section in the way is migrated into the middle of the largest free run first.
pub fn allocate_section_for_host<D: EnclaveDirectory>(
    pool: &SectionPool,
    dir: &D,
) -> Result<MachinePageAddr> {
    let (sfn, owner) = pool.first_non_host_from_top().ok_or(Error::OutOfMemory)?;
    if owner.is_some() {
        let region = pool.largest_free_region().ok_or(Error::OutOfMemory)?;
        // Unwrap ok: the middle of an in-pool region is an in-pool frame.
        let dst = region.start.checked_add((region.len / 2) as u64).unwrap();
        migrate(pool, dir, sfn, dst)?;
    }
    pool.claim(sfn, EnclaveId::host(), RawAddr::enclave(0))?;
    Ok(sfn.base())
}
