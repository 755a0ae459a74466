// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use arrayvec::ArrayVec;
use enclave_pages::{LinearOffset, PageAddr, PageSize, RawAddr, SectionFrame, SECTION_SIZE};
use enclave_page_tables::{patch_linear_run, patch_tree, InverseMap, INVERSE_MAP_ENTRY_NUM};
use machine_regs::{discard_dcache, encode_satp_sv39, flush_dcache, sfence_vma};

use crate::{EnclaveDirectory, Error, Result, SectionPool};

fn in_section(addr: u64, sfn: SectionFrame) -> bool {
    let base = sfn.base().bits();
    addr >= base && addr - base < SECTION_SIZE
}

/// Moves the owned section `src` into the free section `dst`: copies the contents, transfers
/// ownership, repairs the owning enclave's cached physical pointers, page-table tree, leaf
/// mappings and inverse map, then releases `src` zeroed.
///
/// Every failure is checked before the first byte moves, so a failed migration mutates
/// nothing. Migration never fails for lack of memory, only on invariant violations: an owned
/// destination, a free or host-owned source, or an owner with no live context.
///
/// An enclave that has not yet registered its paging pointers has no live mappings to
/// repair; for it only the contents and the cached base pointers move.
pub fn migrate<D: EnclaveDirectory>(
    pool: &SectionPool,
    dir: &D,
    src: SectionFrame,
    dst: SectionFrame,
) -> Result<()> {
    if pool.owner_of(dst)?.is_some() {
        return Err(Error::SectionOwned(dst));
    }
    let owner = pool.owner_of(src)?.ok_or(Error::SectionFree(src))?;
    if owner.is_host() {
        return Err(Error::HostOwned(src));
    }
    let linear_va = pool.va_of(src)?;
    let src_pa = src.base();
    let dst_pa = dst.base();
    let delta = dst_pa.bits().wrapping_sub(src_pa.bits());

    let anchors = dir
        .with_anchors(owner, |a| *a)
        .ok_or(Error::MissingContext)?;
    // The section holding the enclave's base image also holds every cached pointer.
    let anchors_moved = in_section(anchors.base_pa, src);

    // Read and validate the page-table root before mutating anything. The root itself may
    // sit inside the section being moved, in which case the tree is patched at its new home.
    let root_state = if anchors.registered() {
        // Safe per the MAP_REGISTER validation: the cell lies in enclave-owned memory.
        let root = unsafe { core::ptr::read_volatile(anchors.pt_root_addr as *const u64) };
        let root_moved = in_section(root, src);
        let effective = if root_moved {
            root.wrapping_add(delta)
        } else {
            root
        };
        let root_page = PageAddr::with_alignment(RawAddr::machine(effective), PageSize::Size4k)
            .ok_or(Error::BadRootPointer)?;
        Some((root_page, root_moved))
    } else {
        None
    };

    pool.copy_section_contents(src, dst)?;
    pool.adopt(dst, owner, linear_va)?;

    if anchors_moved {
        dir.with_anchors(owner, |a| a.shift(delta));
    }
    // Re-read so patched addresses reflect any shift above.
    let anchors = dir
        .with_anchors(owner, |a| *a)
        .ok_or(Error::MissingContext)?;

    if let Some((root_page, root_moved)) = root_state {
        if root_moved {
            // The cell holding the root value moved with the section; rewrite it at its new
            // location and reinstall the address-translation base for the enclave.
            // Safe: the cell lies in the enclave's memory, now at `dst`.
            unsafe {
                core::ptr::write_volatile(anchors.pt_root_addr as *mut u64, root_page.bits());
            }
            dir.install_satp(owner, encode_satp_sv39(root_page.pfn().bits()));
        }
        if anchors_moved {
            // The linearly-mapped base kept its VA while its PA moved; the offset cell
            // absorbs the difference.
            // Safe: the cell lies in the enclave's memory, now at `dst`.
            unsafe {
                let off_ptr = anchors.offset_addr as *mut u64;
                let off = LinearOffset::new(core::ptr::read_volatile(off_ptr));
                core::ptr::write_volatile(off_ptr, off.relocated_by(delta).bits());
            }
        }

        // Safe: the tree's pages are enclave memory owned by `owner`, quiescent while the
        // monitor holds the dispatch turn.
        unsafe {
            // Repair interior entries whose target table moved along with the section.
            patch_tree(root_page, src_pa.bits(), SECTION_SIZE, delta);

            // Repair the moved section's own linear mapping.
            patch_linear_run(
                root_page,
                linear_va,
                dst_pa,
                SECTION_SIZE / PageSize::Size4k as u64,
            );

            // Repair every inverse-mapped run whose physical base lay in the moved section,
            // then shift the recorded base.
            if let Some(mut inv) = InverseMap::from_registered(anchors.inverse_map_addr) {
                let mut hits: ArrayVec<usize, INVERSE_MAP_ENTRY_NUM> = ArrayVec::new();
                for i in inv.live_entries() {
                    if in_section(inv.read(i).pa, src) {
                        hits.push(i);
                    }
                }
                for i in hits {
                    let entry = inv.read(i);
                    if let Some(new_base) =
                        PageAddr::new(RawAddr::machine(entry.pa.wrapping_add(delta)))
                    {
                        patch_linear_run(
                            root_page,
                            RawAddr::enclave(entry.va),
                            new_base,
                            entry.count,
                        );
                    }
                    inv.shift_pa(i, delta);
                }
            }
        }
    }

    pool.release(src)?;

    // Nothing may observe the old translations or stale lines for either location.
    sfence_vma();
    flush_dcache();
    discard_dcache();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{stub_pool, translate, GuestSpace, StubDirectory};
    use enclave_pages::EnclaveId;

    fn eid(n: u64) -> EnclaveId {
        EnclaveId::new(n).unwrap()
    }

    #[test]
    fn rejects_bad_endpoints() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        dir.add(eid(1), 4);
        let s0 = base;
        let s1 = base.checked_add(1).unwrap();
        pool.claim(s0, eid(1), RawAddr::enclave(0)).unwrap();
        pool.claim(s1, eid(1), RawAddr::enclave(0)).unwrap();

        // Owned destination.
        assert_eq!(
            migrate(&pool, &dir, s0, s1).err(),
            Some(Error::SectionOwned(s1))
        );
        // Free source.
        let s2 = base.checked_add(2).unwrap();
        let s3 = base.checked_add(3).unwrap();
        assert_eq!(
            migrate(&pool, &dir, s2, s3).err(),
            Some(Error::SectionFree(s2))
        );
        // Neither endpoint changed.
        assert_eq!(pool.owner_of(s0).unwrap(), Some(eid(1)));
        assert_eq!(pool.owner_of(s2).unwrap(), None);
    }

    #[test]
    fn rejects_host_source_and_missing_context() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        let dst = base.checked_add(1).unwrap();

        pool.claim(base, EnclaveId::host(), RawAddr::enclave(0))
            .unwrap();
        assert_eq!(
            migrate(&pool, &dir, base, dst).err(),
            Some(Error::HostOwned(base))
        );

        let s2 = base.checked_add(2).unwrap();
        pool.claim(s2, eid(3), RawAddr::enclave(0)).unwrap();
        // Enclave 3 has no context in the directory.
        assert_eq!(
            migrate(&pool, &dir, s2, dst).err(),
            Some(Error::MissingContext)
        );
        assert_eq!(pool.owner_of(s2).unwrap(), Some(eid(3)));
    }

    #[test]
    fn moves_content_and_ownership_pre_registration() {
        // An enclave that hasn't registered its paging pointers yet has no mappings to
        // repair; only bytes and metadata move.
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        let a = eid(1);
        dir.add(a, 4);

        let src = base;
        let dst = base.checked_add(2).unwrap();
        let va = RawAddr::enclave(0xC000_0000);
        pool.claim(src, a, va).unwrap();
        dir.set_base(a, src.base().bits());
        unsafe { core::ptr::write(src.base().bits() as *mut u64, 0xfeed_f00d) };

        migrate(&pool, &dir, src, dst).unwrap();

        assert_eq!(pool.owner_of(src).unwrap(), None);
        assert_eq!(pool.owner_of(dst).unwrap(), Some(a));
        assert_eq!(pool.va_of(dst).unwrap().bits(), va.bits());
        // Content followed the section; the source is zeroed.
        assert_eq!(
            unsafe { core::ptr::read(dst.base().bits() as *const u64) },
            0xfeed_f00d
        );
        assert_eq!(unsafe { core::ptr::read(src.base().bits() as *const u64) }, 0);
        // The cached base pointer moved with it.
        assert_eq!(dir.anchors(a).base_pa, dst.base().bits());
    }

    #[test]
    fn base_section_migration_repairs_everything() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        let a = eid(1);
        dir.add(a, 4);

        let src = base;
        let dst = base.checked_add(2).unwrap();
        let linear_va = 0xC000_0000u64;
        pool.claim(src, a, RawAddr::enclave(linear_va)).unwrap();

        // Build a live guest image in the section: root cell, offset cell, inverse map and
        // a linear mapping of the section's first pages.
        let mut guest = GuestSpace::install(src.base().bits(), linear_va);
        for i in 0..8 {
            guest.map(linear_va + i * 0x1000, src.base().bits() + i * 0x1000);
        }
        dir.set_anchors(a, guest.anchors());

        let delta = dst.base().bits().wrapping_sub(src.base().bits());
        let old_root = guest.root();

        migrate(&pool, &dir, src, dst).unwrap();

        // Anchors shifted as a unit.
        let anchors = dir.anchors(a);
        assert_eq!(anchors.base_pa, dst.base().bits());
        assert_eq!(anchors.pt_root_addr, guest.anchors().pt_root_addr + delta);
        // The root cell's value follows the moved tables, and satp was reinstalled.
        let new_root = unsafe { core::ptr::read(anchors.pt_root_addr as *const u64) };
        assert_eq!(new_root, old_root + delta);
        assert_eq!(dir.installed_satp(a), Some(encode_satp_sv39(new_root >> 12)));
        // The offset cell absorbed the move.
        let new_offset = unsafe { core::ptr::read(anchors.offset_addr as *const u64) };
        assert_eq!(new_offset, linear_va.wrapping_sub(dst.base().bits()));
        // Every previously mapped VA resolves into the destination section.
        for i in 0..8 {
            assert_eq!(
                translate(&anchors, linear_va + i * 0x1000),
                Some(dst.base().bits() + i * 0x1000)
            );
        }
        // Source is free again.
        assert_eq!(pool.owner_of(src).unwrap(), None);
    }

    #[test]
    fn data_section_migration_leaves_base_alone() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        let a = eid(1);
        dir.add(a, 4);

        let base_sec = base;
        let data_sec = base.checked_add(1).unwrap();
        let dst = base.checked_add(3).unwrap();
        let base_va = 0xC000_0000u64;
        let data_va = 0xC020_0000u64;
        pool.claim(base_sec, a, RawAddr::enclave(base_va)).unwrap();
        pool.claim(data_sec, a, RawAddr::enclave(data_va)).unwrap();

        let mut guest = GuestSpace::install(base_sec.base().bits(), base_va);
        for i in 0..4 {
            guest.map(data_va + i * 0x1000, data_sec.base().bits() + i * 0x1000);
        }
        dir.set_anchors(a, guest.anchors());

        migrate(&pool, &dir, data_sec, dst).unwrap();

        // The base section didn't move: anchors, root and satp untouched.
        let anchors = dir.anchors(a);
        assert_eq!(anchors, guest.anchors());
        assert_eq!(dir.installed_satp(a), None);
        // The data pages translate to their new home.
        for i in 0..4 {
            assert_eq!(
                translate(&anchors, data_va + i * 0x1000),
                Some(dst.base().bits() + i * 0x1000)
            );
        }
        assert_eq!(pool.owner_of(data_sec).unwrap(), None);
        assert_eq!(pool.owner_of(dst).unwrap(), Some(a));
    }

    #[test]
    fn inverse_mapped_runs_are_repaired() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let dir = StubDirectory::new();
        let a = eid(1);
        dir.add(a, 4);

        let src = base;
        let dst = base.checked_add(2).unwrap();
        let linear_va = 0xC000_0000u64;
        pool.claim(src, a, RawAddr::enclave(linear_va)).unwrap();

        let mut guest = GuestSpace::install(src.base().bits(), linear_va);
        // Two pages of the section aliased at a non-linear VA, recorded in the inverse map.
        let alias_va = 0xD000_0000u64;
        let alias_pa = src.base().bits() + 0x10_000;
        guest.map(alias_va, alias_pa);
        guest.map(alias_va + 0x1000, alias_pa + 0x1000);
        guest.add_inverse_entry(alias_pa, alias_va, 2);
        dir.set_anchors(a, guest.anchors());

        let delta = dst.base().bits().wrapping_sub(src.base().bits());
        migrate(&pool, &dir, src, dst).unwrap();

        let anchors = dir.anchors(a);
        // The aliased VAs now resolve into the destination section.
        assert_eq!(translate(&anchors, alias_va), Some(alias_pa + delta));
        assert_eq!(
            translate(&anchors, alias_va + 0x1000),
            Some(alias_pa + delta + 0x1000)
        );
        // The inverse-map entry's base was shifted; its VA side is unchanged.
        let inv = unsafe { InverseMap::from_registered(anchors.inverse_map_addr) }.unwrap();
        let entry = inv.read(0);
        assert_eq!(entry.pa, alias_pa + delta);
        assert_eq!(entry.va, alias_va);
        assert_eq!(entry.count, 2);
    }
}
