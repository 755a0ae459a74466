// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use arrayvec::ArrayVec;
use enclave_pages::{
    EnclaveId, EnclaveVirtAddr, MachinePageAddr, PageSize, RawAddr, SectionFrame, SECTION_SIZE,
};
use spin::Mutex;
use static_assertions::const_assert;

use crate::{Error, Result};

/// Number of sections in the physical memory pool. Fixed at build time; running out of
/// sections is an allocation failure, never a resize.
pub const MEMORY_POOL_SECTION_NUM: usize = 128;

const_assert!(MEMORY_POOL_SECTION_NUM > 0);
// Sections are whole numbers of 4kB pages; leaf patching during migration relies on it.
const_assert!(SECTION_SIZE % (PageSize::Size4k as u64) == 0);

/// A maximal run of sections satisfying some ownership predicate. Never stored; recomputed
/// from the table by a linear scan each time a query needs one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: SectionFrame,
    pub len: usize,
}

impl Region {
    /// Returns the frame one past the last section of the region.
    pub fn end(&self) -> SectionFrame {
        // Unwrap ok: regions are built from in-pool frames, which sit far from u64::MAX.
        self.start.checked_add(self.len as u64).unwrap()
    }
}

// Per-section ownership record. `va` is the virtual base the owner maps the section at and
// is only meaningful while `owner` is set.
#[derive(Clone, Copy)]
struct SectionInfo {
    owner: Option<EnclaveId>,
    va: u64,
}

struct SectionPoolInner {
    base: SectionFrame,
    sections: ArrayVec<SectionInfo, MEMORY_POOL_SECTION_NUM>,
}

impl SectionPoolInner {
    fn index_of(&self, sfn: SectionFrame) -> Result<usize> {
        sfn.bits()
            .checked_sub(self.base.bits())
            .map(|i| i as usize)
            .filter(|&i| i < self.sections.len())
            .ok_or(Error::InvalidSection(sfn))
    }

    fn frame_at(&self, index: usize) -> SectionFrame {
        // Unwrap ok: index came from the table, so the sum stays inside the pool.
        self.base.checked_add(index as u64).unwrap()
    }

    // Visits every maximal run of sections matching `pred`, in ascending frame order.
    fn scan_regions<P: Fn(&SectionInfo) -> bool, V: FnMut(Region)>(&self, pred: P, mut visit: V) {
        let mut head: Option<usize> = None;
        for (i, info) in self.sections.iter().enumerate() {
            match (head, pred(info)) {
                (None, true) => head = Some(i),
                (Some(h), false) => {
                    visit(Region {
                        start: self.frame_at(h),
                        len: i - h,
                    });
                    head = None;
                }
                _ => (),
            }
        }
        // A run touching the end of the pool has no non-matching section to close it.
        if let Some(h) = head {
            visit(Region {
                start: self.frame_at(h),
                len: self.sections.len() - h,
            });
        }
    }
}

/// The section pool: one record per physical section, tracking which context owns it. All
/// metadata updates take the pool lock; section contents are zeroed on every ownership
/// handoff so no owner's data survives into the next.
pub struct SectionPool {
    inner: Mutex<SectionPoolInner>,
}

impl SectionPool {
    /// Creates a pool over the physical range `[base, base + size)`, all sections free.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive ownership of the range and it must remain accessible
    /// at its physical address for the lifetime of the pool; the pool zeroes and copies
    /// section contents through raw pointers derived from it.
    pub unsafe fn new(base: MachinePageAddr, size: u64) -> Result<Self> {
        if !base.is_aligned(PageSize::Size2M) || size % SECTION_SIZE != 0 {
            return Err(Error::MisalignedPool);
        }
        let count = (size / SECTION_SIZE) as usize;
        if count == 0 || count > MEMORY_POOL_SECTION_NUM {
            return Err(Error::InvalidPoolSize);
        }
        let mut sections = ArrayVec::new();
        for _ in 0..count {
            sections.push(SectionInfo {
                owner: None,
                va: 0,
            });
        }
        Ok(Self {
            inner: Mutex::new(SectionPoolInner {
                base: SectionFrame::containing(RawAddr::from(base)),
                sections,
            }),
        })
    }

    /// Returns the first frame of the pool and the number of sections it holds.
    pub fn span(&self) -> (SectionFrame, usize) {
        let inner = self.inner.lock();
        (inner.base, inner.sections.len())
    }

    /// Returns the owner of `sfn`, `None` when the section is free.
    pub fn owner_of(&self, sfn: SectionFrame) -> Result<Option<EnclaveId>> {
        let inner = self.inner.lock();
        let i = inner.index_of(sfn)?;
        Ok(inner.sections[i].owner)
    }

    /// Returns the virtual base `sfn` is mapped at in its owner's address space.
    pub fn va_of(&self, sfn: SectionFrame) -> Result<EnclaveVirtAddr> {
        let inner = self.inner.lock();
        let i = inner.index_of(sfn)?;
        Ok(RawAddr::enclave(inner.sections[i].va))
    }

    /// Gives the free section `sfn` to `owner`, mapped at `va`. The section is zeroed before
    /// the new owner can see it.
    pub fn claim(&self, sfn: SectionFrame, owner: EnclaveId, va: EnclaveVirtAddr) -> Result<()> {
        let mut inner = self.inner.lock();
        let i = inner.index_of(sfn)?;
        if inner.sections[i].owner.is_some() {
            return Err(Error::SectionOwned(sfn));
        }
        Self::zero_contents(sfn);
        inner.sections[i] = SectionInfo {
            owner: Some(owner),
            va: va.bits(),
        };
        Ok(())
    }

    /// Returns `sfn` to the pool. The contents are zeroed so nothing of the previous owner
    /// survives. Releasing a free section is a no-op.
    pub fn release(&self, sfn: SectionFrame) -> Result<()> {
        let mut inner = self.inner.lock();
        let i = inner.index_of(sfn)?;
        if inner.sections[i].owner.is_none() {
            return Ok(());
        }
        Self::zero_contents(sfn);
        inner.sections[i] = SectionInfo {
            owner: None,
            va: 0,
        };
        Ok(())
    }

    /// Releases every section owned by `owner`. Returns the number of sections freed.
    pub fn release_all(&self, owner: EnclaveId) -> usize {
        let mut inner = self.inner.lock();
        let mut freed = 0;
        for i in 0..inner.sections.len() {
            if inner.sections[i].owner == Some(owner) {
                Self::zero_contents(inner.frame_at(i));
                inner.sections[i] = SectionInfo {
                    owner: None,
                    va: 0,
                };
                freed += 1;
            }
        }
        freed
    }

    // Transfers ownership metadata onto `dst` without touching its contents. Only migration
    // uses this, after it has copied the source section's bytes into `dst`.
    pub(crate) fn adopt(
        &self,
        dst: SectionFrame,
        owner: EnclaveId,
        va: EnclaveVirtAddr,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let i = inner.index_of(dst)?;
        if inner.sections[i].owner.is_some() {
            return Err(Error::SectionOwned(dst));
        }
        inner.sections[i] = SectionInfo {
            owner: Some(owner),
            va: va.bits(),
        };
        Ok(())
    }

    /// Copies the full contents of section `src` into section `dst`.
    pub fn copy_section_contents(&self, src: SectionFrame, dst: SectionFrame) -> Result<()> {
        {
            let inner = self.inner.lock();
            inner.index_of(src)?;
            inner.index_of(dst)?;
        }
        // Safe per the pool's ownership of the backing range; sections are disjoint.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.base().bits() as *const u8,
                dst.base().bits() as *mut u8,
                SECTION_SIZE as usize,
            );
        }
        Ok(())
    }

    /// Returns a free section physically adjacent to one of `owner`'s sections. The scan
    /// follows ascending frame order and checks the lower neighbor before the upper one, so
    /// repeated calls grow an enclave's footprint into one contiguous run.
    pub fn free_neighbor_of(&self, owner: EnclaveId) -> Option<SectionFrame> {
        let inner = self.inner.lock();
        for (i, info) in inner.sections.iter().enumerate() {
            if info.owner != Some(owner) {
                continue;
            }
            if i > 0 && inner.sections[i - 1].owner.is_none() {
                return Some(inner.frame_at(i - 1));
            }
            if i + 1 < inner.sections.len() && inner.sections[i + 1].owner.is_none() {
                return Some(inner.frame_at(i + 1));
            }
        }
        None
    }

    /// Returns the largest run of free sections. Among equally large runs the lowest wins.
    pub fn largest_free_region(&self) -> Option<Region> {
        let inner = self.inner.lock();
        let mut best: Option<Region> = None;
        inner.scan_regions(
            |s| s.owner.is_none(),
            |r| match best {
                Some(b) if r.len <= b.len => (),
                _ => best = Some(r),
            },
        );
        best
    }

    /// Returns the smallest run of sections owned by `owner`. Among equally small runs the
    /// lowest wins.
    pub fn smallest_region_owned_by(&self, owner: EnclaveId) -> Option<Region> {
        let inner = self.inner.lock();
        let mut best: Option<Region> = None;
        inner.scan_regions(
            |s| s.owner == Some(owner),
            |r| match best {
                Some(b) if r.len >= b.len => (),
                _ => best = Some(r),
            },
        );
        best
    }

    /// Returns the first run of free sections strictly longer than `len`.
    pub fn free_region_larger_than(&self, len: usize) -> Option<Region> {
        let inner = self.inner.lock();
        let mut found: Option<Region> = None;
        inner.scan_regions(
            |s| s.owner.is_none(),
            |r| {
                if found.is_none() && r.len > len {
                    found = Some(r);
                }
            },
        );
        found
    }

    /// Scanning down from the top of the pool, returns the first section not owned by the
    /// host, along with its owner. Host allocations are packed at the high end of the pool
    /// to keep host and enclave memory distinguishable during bring-up.
    pub fn first_non_host_from_top(&self) -> Option<(SectionFrame, Option<EnclaveId>)> {
        let inner = self.inner.lock();
        for (i, info) in inner.sections.iter().enumerate().rev() {
            if info.owner != Some(EnclaveId::host()) {
                return Some((inner.frame_at(i), info.owner));
            }
        }
        None
    }

    /// Returns the number of owned sections in the pool.
    pub fn owned_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.sections.iter().filter(|s| s.owner.is_some()).count()
    }

    /// Returns the number of sections owned by `owner`.
    pub fn count_owned_by(&self, owner: EnclaveId) -> usize {
        let inner = self.inner.lock();
        inner
            .sections
            .iter()
            .filter(|s| s.owner == Some(owner))
            .count()
    }

    /// Counts free sections immediately followed by an owned one. Compaction must never
    /// increase this; the tiered allocator relies on it shrinking under pressure.
    pub fn frag_boundaries(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .sections
            .windows(2)
            .filter(|w| w[0].owner.is_none() && w[1].owner.is_some())
            .count()
    }

    fn zero_contents(sfn: SectionFrame) {
        // Safe per the pool's ownership of the backing range.
        unsafe {
            core::ptr::write_bytes(sfn.base().bits() as *mut u8, 0, SECTION_SIZE as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::stub_pool;

    fn eid(n: u64) -> EnclaveId {
        EnclaveId::new(n).unwrap()
    }

    #[test]
    fn rejects_bad_geometry() {
        let (pool, base) = stub_pool(4);
        let (first, count) = pool.span();
        assert_eq!(count, 4);
        assert_eq!(first.base().bits(), base);

        // Unaligned size.
        assert_eq!(
            unsafe { SectionPool::new(first.base(), SECTION_SIZE + 1) }.err(),
            Some(Error::MisalignedPool)
        );
        // Zero sections.
        assert_eq!(
            unsafe { SectionPool::new(first.base(), 0) }.err(),
            Some(Error::InvalidPoolSize)
        );
    }

    #[test]
    fn claim_and_release_round_trip() {
        let (pool, _) = stub_pool(4);
        let (base, _) = pool.span();
        let owner = eid(1);
        let va = RawAddr::enclave(0xC000_0000);

        pool.claim(base, owner, va).unwrap();
        assert_eq!(pool.owner_of(base).unwrap(), Some(owner));
        assert_eq!(pool.va_of(base).unwrap().bits(), va.bits());
        // Double claim is an invariant violation.
        assert_eq!(pool.claim(base, eid(2), va).err(), Some(Error::SectionOwned(base)));

        pool.release(base).unwrap();
        assert_eq!(pool.owner_of(base).unwrap(), None);
        // Releasing again is harmless.
        pool.release(base).unwrap();
    }

    #[test]
    fn release_zeroes_contents() {
        let (pool, _) = stub_pool(2);
        let (base, _) = pool.span();
        pool.claim(base, eid(1), RawAddr::enclave(0)).unwrap();

        let ptr = base.base().bits() as *mut u8;
        unsafe { core::ptr::write_bytes(ptr, 0xa5, 64) };
        pool.release(base).unwrap();
        for i in 0..64 {
            assert_eq!(unsafe { core::ptr::read(ptr.add(i)) }, 0);
        }
    }

    #[test]
    fn out_of_pool_frame_rejected() {
        let (pool, _) = stub_pool(2);
        let (base, count) = pool.span();
        let outside = base.checked_add(count as u64).unwrap();
        assert_eq!(
            pool.owner_of(outside).err(),
            Some(Error::InvalidSection(outside))
        );
        let below = base.checked_sub(1).unwrap();
        assert_eq!(pool.owner_of(below).err(), Some(Error::InvalidSection(below)));
    }

    #[test]
    fn region_queries() {
        let (pool, _) = stub_pool(8);
        let (base, _) = pool.span();
        let a = eid(1);
        let b = eid(2);
        // Layout: A A . . . B . .
        let va = RawAddr::enclave(0);
        pool.claim(base, a, va).unwrap();
        pool.claim(base.checked_add(1).unwrap(), a, va).unwrap();
        pool.claim(base.checked_add(5).unwrap(), b, va).unwrap();

        let largest = pool.largest_free_region().unwrap();
        assert_eq!(largest.start, base.checked_add(2).unwrap());
        assert_eq!(largest.len, 3);

        let smallest_a = pool.smallest_region_owned_by(a).unwrap();
        assert_eq!(smallest_a.start, base);
        assert_eq!(smallest_a.len, 2);

        let bigger = pool.free_region_larger_than(2).unwrap();
        assert_eq!(bigger.start, base.checked_add(2).unwrap());
        assert!(pool.free_region_larger_than(3).is_none());
    }

    #[test]
    fn largest_free_ties_go_to_first() {
        let (pool, _) = stub_pool(7);
        let (base, _) = pool.span();
        // Layout: . . X . . X .  - two 2-section free runs and a trailing 1-section run.
        pool.claim(base.checked_add(2).unwrap(), eid(1), RawAddr::enclave(0))
            .unwrap();
        pool.claim(base.checked_add(5).unwrap(), eid(1), RawAddr::enclave(0))
            .unwrap();
        let largest = pool.largest_free_region().unwrap();
        assert_eq!(largest.start, base);
        assert_eq!(largest.len, 2);
    }

    #[test]
    fn single_free_section_in_full_pool() {
        // Pool fully owned except one free section in the middle; the largest free region is
        // exactly that section.
        let (pool, _) = stub_pool(8);
        let (base, count) = pool.span();
        let b = eid(2);
        for i in 0..count as u64 {
            if i != 4 {
                pool.claim(base.checked_add(i).unwrap(), b, RawAddr::enclave(0))
                    .unwrap();
            }
        }
        let largest = pool.largest_free_region().unwrap();
        assert_eq!(largest.start, base.checked_add(4).unwrap());
        assert_eq!(largest.len, 1);
    }

    #[test]
    fn neighbor_scan_prefers_lower() {
        let (pool, _) = stub_pool(5);
        let (base, _) = pool.span();
        let a = eid(1);
        pool.claim(base.checked_add(2).unwrap(), a, RawAddr::enclave(0))
            .unwrap();
        // Both neighbors free: the lower one wins.
        assert_eq!(
            pool.free_neighbor_of(a),
            Some(base.checked_add(1).unwrap())
        );
        pool.claim(base.checked_add(1).unwrap(), eid(2), RawAddr::enclave(0))
            .unwrap();
        assert_eq!(
            pool.free_neighbor_of(a),
            Some(base.checked_add(3).unwrap())
        );
    }

    #[test]
    fn ownership_partitions_pool() {
        let (pool, _) = stub_pool(6);
        let (base, count) = pool.span();
        pool.claim(base, eid(1), RawAddr::enclave(0)).unwrap();
        pool.claim(base.checked_add(3).unwrap(), eid(2), RawAddr::enclave(0))
            .unwrap();

        // Every section is either free or owned by exactly one id; the counts partition the
        // pool exactly.
        let owned = pool.owned_count();
        let by_one = pool.count_owned_by(eid(1));
        let by_two = pool.count_owned_by(eid(2));
        assert_eq!(owned, by_one + by_two);
        assert_eq!(owned, 2);
        assert_eq!(count - owned, 4);

        assert_eq!(pool.release_all(eid(1)), 1);
        assert_eq!(pool.owned_count(), 1);
    }

    #[test]
    fn frag_boundary_count() {
        let (pool, _) = stub_pool(6);
        let (base, _) = pool.span();
        // Layout: . X . X . .  - two free->owned boundaries.
        pool.claim(base.checked_add(1).unwrap(), eid(1), RawAddr::enclave(0))
            .unwrap();
        pool.claim(base.checked_add(3).unwrap(), eid(1), RawAddr::enclave(0))
            .unwrap();
        assert_eq!(pool.frag_boundaries(), 2);
    }
}
