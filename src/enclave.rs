// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Enclave contexts and the lifecycle state machine.
//!
//! One context per slot, slot 0 reserved for the host. A context carries the saved
//! normal-world CSRs and U-mode GPRs used to multiplex a core between worlds, the cached
//! physical anchors the allocator patches during relocation, and the enclave's PMP budget
//! and peripheral records.
//!
//! Lifecycle transitions are split into a `begin_*` check and a `commit_*` flip so the
//! CSR and copy work between them can fail or be tested without ever leaving a half-moved
//! state: an illegal transition returns an error before anything is touched.

use arrayvec::ArrayVec;
use enclave_pages::{EnclaveId, PageSize, RawAddr, NUM_ENCLAVE};
use machine_regs::{copy_from_caller, CallerPtr, GeneralPurposeRegisters, GprIndex, TrapFrame};
use section_tracking::{allocate_section, EnclaveAnchors};
use spin::Mutex;

use crate::layout::{EMEM_SIZE, ENCLAVE_VA_START, EUSR_MEM_SIZE};
use crate::monitor::Monitor;
use crate::pmp::{self, PmpBudget};

/// Number of peripheral mappings one enclave may register.
pub const PERI_REGION_MAX: usize = 16;

/// Errors from lifecycle operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The payload doesn't fit an enclave's initial section.
    PayloadTooLarge,
    /// Every enclave slot is occupied.
    NoFreeSlots,
    /// The id names no enclave slot.
    InvalidId,
    /// The enclave or host status doesn't permit the requested transition.
    InvalidState,
    /// The peripheral record table is full.
    PeriTableFull,
    /// Registration pointers must be non-null, aligned, and inside the enclave's memory.
    BadRegistration,
    /// Parameters don't fit the enclave's parameter region.
    BadParam,
    /// Section allocation failed beneath the lifecycle operation.
    Section(section_tracking::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Lifecycle states. `Free -> Load -> Run <-> Idle`, any state back to `Free` on exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnclaveStatus {
    Free,
    Load,
    Run,
    Idle,
}

/// The normal-world CSR snapshot saved and restored when a core changes worlds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalWorldCsrs {
    pub satp: u64,
    pub mepc: u64,
    pub mstatus: u64,
    pub medeleg: u64,
    pub sie: u64,
    pub stvec: u64,
    pub sstatus: u64,
    pub sscratch: u64,
}

impl NormalWorldCsrs {
    /// Snapshots the interrupted world: live CSRs plus the trap frame's mepc/mstatus. The
    /// saved mepc is the instruction after the call, so restoring resumes past it.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn capture(regs: &TrapFrame) -> Self {
        use machine_regs::CSR;
        use tock_registers::interfaces::Readable;
        Self {
            satp: CSR.satp.get(),
            mepc: regs.mepc,
            mstatus: regs.mstatus,
            medeleg: CSR.medeleg.get(),
            sie: CSR.sie.get(),
            stvec: CSR.stvec.get(),
            sstatus: CSR.sstatus.get(),
            sscratch: CSR.sscratch.get(),
        }
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    pub fn capture(_regs: &TrapFrame) -> Self {
        unimplemented!("CSR capture on non-riscv host")
    }

    /// Installs the snapshot on the calling core.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn install(&self, regs: &mut TrapFrame) {
        use machine_regs::{sfence_vma, CSR};
        use tock_registers::interfaces::Writeable;
        CSR.satp.set(self.satp);
        sfence_vma();
        CSR.medeleg.set(self.medeleg);
        CSR.sie.set(self.sie);
        CSR.stvec.set(self.stvec);
        CSR.sstatus.set(self.sstatus);
        CSR.sscratch.set(self.sscratch);
        regs.mepc = self.mepc;
        regs.mstatus = self.mstatus;
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    pub fn install(&self, _regs: &mut TrapFrame) {
        unimplemented!("CSR install on non-riscv host")
    }

    /// Builds the launch context for a new enclave: supervisor privilege, interrupts
    /// enabled, entry at the base module above the user region, no paging yet.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn fresh_for_launch(base_pa: u64) -> Self {
        use machine_regs::{mstatus, sstatus, CSR, LocalRegisterCopy};
        use tock_registers::interfaces::Readable;

        let mut ms: LocalRegisterCopy<u64, mstatus::Register> =
            LocalRegisterCopy::new(CSR.mstatus.get());
        ms.modify(mstatus::mpp::Supervisor);
        ms.modify(mstatus::sie::SET);
        ms.modify(mstatus::spie::CLEAR);

        let mut ss: LocalRegisterCopy<u64, sstatus::Register> =
            LocalRegisterCopy::new(CSR.sstatus.get());
        ss.modify(sstatus::sie::CLEAR);

        Self {
            satp: 0,
            mepc: base_pa + EUSR_MEM_SIZE,
            mstatus: ms.get(),
            medeleg: CSR.medeleg.get(),
            sie: 0,
            stvec: 0,
            sstatus: ss.get(),
            sscratch: 0,
        }
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    pub fn fresh_for_launch(_base_pa: u64) -> Self {
        unimplemented!("CSR capture on non-riscv host")
    }
}

/// A peripheral mapping an enclave reported holding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriRegion {
    pub pa: u64,
    pub va: u64,
    pub size: u64,
}

/// One enclave control block.
pub struct EnclaveContext {
    status: EnclaveStatus,
    mem_size: u64,
    payload_size: u64,
    user_param: u64,
    anchors: EnclaveAnchors,
    csrs: NormalWorldCsrs,
    gprs: GeneralPurposeRegisters,
    pmp: PmpBudget,
    peri: ArrayVec<PeriRegion, PERI_REGION_MAX>,
}

impl EnclaveContext {
    fn free() -> Self {
        Self {
            status: EnclaveStatus::Free,
            mem_size: 0,
            payload_size: 0,
            user_param: 0,
            anchors: EnclaveAnchors::default(),
            csrs: NormalWorldCsrs::default(),
            gprs: GeneralPurposeRegisters::default(),
            pmp: PmpBudget::new(),
            peri: ArrayVec::new(),
        }
    }
}

/// The fixed table of enclave control blocks, slot 0 being the host. All status checks and
/// mutations take the table lock; the lock is never held across allocator or CSR work.
pub struct EnclaveTable {
    slots: Mutex<[EnclaveContext; NUM_ENCLAVE as usize + 1]>,
}

impl EnclaveTable {
    pub fn new() -> Self {
        let mut slots: [EnclaveContext; NUM_ENCLAVE as usize + 1] =
            core::array::from_fn(|_| EnclaveContext::free());
        // The host is running when the monitor comes up.
        slots[0].status = EnclaveStatus::Run;
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn status_of(&self, id: EnclaveId) -> EnclaveStatus {
        self.slots.lock()[id.raw() as usize].status
    }

    /// Claims a free slot for a new enclave. The payload size is checked before anything
    /// else so an oversized request fails with no slot taken and no memory touched.
    pub fn reserve_slot(&self, payload_size: u64) -> Result<EnclaveId> {
        if PageSize::Size4k.round_up(payload_size) > EMEM_SIZE {
            return Err(Error::PayloadTooLarge);
        }
        let mut slots = self.slots.lock();
        for i in 1..=NUM_ENCLAVE as usize {
            if slots[i].status == EnclaveStatus::Free {
                slots[i] = EnclaveContext::free();
                slots[i].status = EnclaveStatus::Load;
                slots[i].mem_size = EMEM_SIZE;
                slots[i].payload_size = payload_size;
                // Unwrap ok: 1..=NUM_ENCLAVE are valid enclave ids.
                return Ok(EnclaveId::new(i as u64).unwrap());
            }
        }
        Err(Error::NoFreeSlots)
    }

    /// Returns a reserved slot to `Free`, zeroing the control block.
    pub fn release_slot(&self, id: EnclaveId) {
        self.slots.lock()[id.raw() as usize] = EnclaveContext::free();
    }

    /// Records the populated enclave's addresses and launch context.
    pub fn set_created(
        &self,
        id: EnclaveId,
        base_pa: u64,
        drv_list: u64,
        user_param: u64,
        csrs: NormalWorldCsrs,
    ) {
        let mut slots = self.slots.lock();
        let c = &mut slots[id.raw() as usize];
        c.anchors.base_pa = base_pa;
        c.anchors.drv_list = drv_list;
        c.user_param = user_param;
        c.csrs = csrs;
    }

    pub fn begin_enter(&self, id: EnclaveId) -> Result<()> {
        let slots = self.slots.lock();
        if slots[id.raw() as usize].status == EnclaveStatus::Load
            && slots[0].status == EnclaveStatus::Run
        {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    pub fn commit_enter(&self, id: EnclaveId) {
        let mut slots = self.slots.lock();
        slots[0].status = EnclaveStatus::Idle;
        slots[id.raw() as usize].status = EnclaveStatus::Run;
    }

    pub fn begin_exit(&self, id: EnclaveId) -> Result<()> {
        let slots = self.slots.lock();
        if slots[id.raw() as usize].status == EnclaveStatus::Run
            && slots[0].status == EnclaveStatus::Idle
        {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Frees the slot and returns the core's world to the host. Everything the enclave was
    /// is zeroed; nothing of it survives into the next occupant.
    pub fn commit_exit(&self, id: EnclaveId) {
        let mut slots = self.slots.lock();
        slots[id.raw() as usize] = EnclaveContext::free();
        slots[0].status = EnclaveStatus::Run;
    }

    pub fn begin_suspend(&self, id: EnclaveId) -> Result<()> {
        let slots = self.slots.lock();
        if slots[id.raw() as usize].status == EnclaveStatus::Run
            && slots[0].status == EnclaveStatus::Idle
        {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    pub fn commit_suspend(&self, id: EnclaveId) {
        let mut slots = self.slots.lock();
        slots[id.raw() as usize].status = EnclaveStatus::Idle;
        slots[0].status = EnclaveStatus::Run;
    }

    pub fn begin_resume(&self, id: EnclaveId) -> Result<()> {
        let slots = self.slots.lock();
        if slots[id.raw() as usize].status == EnclaveStatus::Idle
            && slots[0].status == EnclaveStatus::Run
        {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    pub fn commit_resume(&self, id: EnclaveId) {
        let mut slots = self.slots.lock();
        slots[id.raw() as usize].status = EnclaveStatus::Run;
        slots[0].status = EnclaveStatus::Idle;
    }

    /// Saves the register/CSR snapshot of the world leaving the core.
    pub fn save_world(&self, id: EnclaveId, csrs: NormalWorldCsrs, gprs: &GeneralPurposeRegisters) {
        let mut slots = self.slots.lock();
        let c = &mut slots[id.raw() as usize];
        c.csrs = csrs;
        c.gprs = gprs.clone();
    }

    /// Returns the snapshot of the world about to take the core.
    pub fn saved_world(&self, id: EnclaveId) -> (NormalWorldCsrs, GeneralPurposeRegisters) {
        let slots = self.slots.lock();
        let c = &slots[id.raw() as usize];
        (c.csrs, c.gprs.clone())
    }

    /// Rewrites the saved address-translation base of a non-resident enclave after its
    /// page-table root moved.
    pub fn set_saved_satp(&self, id: EnclaveId, satp: u64) {
        self.slots.lock()[id.raw() as usize].csrs.satp = satp;
    }

    /// Calls `f` on the enclave's anchors. `None` for the host and for dead slots.
    pub fn with_anchors<R>(
        &self,
        id: EnclaveId,
        f: impl FnOnce(&mut EnclaveAnchors) -> R,
    ) -> Option<R> {
        if id.is_host() {
            return None;
        }
        let mut slots = self.slots.lock();
        let c = &mut slots[id.raw() as usize];
        if c.status == EnclaveStatus::Free {
            return None;
        }
        Some(f(&mut c.anchors))
    }

    /// Records the enclave's self-reported bookkeeping pointers. Each must be non-null,
    /// 8-byte aligned and inside the enclave's initial memory; a registration that fails
    /// these checks changes nothing.
    pub fn register_maps(
        &self,
        id: EnclaveId,
        pt_root_ptr: u64,
        inverse_map_ptr: u64,
        offset_ptr: u64,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        let c = &mut slots[id.raw() as usize];
        if c.status == EnclaveStatus::Free {
            return Err(Error::InvalidState);
        }
        let in_enclave = |p: u64| {
            p != 0 && p % 8 == 0 && p >= c.anchors.base_pa && p < c.anchors.base_pa + c.mem_size
        };
        if !in_enclave(pt_root_ptr) || !in_enclave(inverse_map_ptr) || !in_enclave(offset_ptr) {
            return Err(Error::BadRegistration);
        }
        c.anchors.pt_root_addr = pt_root_ptr;
        c.anchors.inverse_map_addr = inverse_map_ptr;
        c.anchors.offset_addr = offset_ptr;
        Ok(())
    }

    /// Records a peripheral mapping for the enclave.
    pub fn add_peri(&self, id: EnclaveId, peri: PeriRegion) -> Result<()> {
        let mut slots = self.slots.lock();
        let c = &mut slots[id.raw() as usize];
        if c.status == EnclaveStatus::Free {
            return Err(Error::InvalidState);
        }
        c.peri.try_push(peri).map_err(|_| Error::PeriTableFull)
    }

    pub fn pmp_slots_free(&self, id: EnclaveId) -> usize {
        self.slots.lock()[id.raw() as usize].pmp.free_slots()
    }

    pub fn take_pmp_slot(&self, id: EnclaveId, region_base: u64) -> bool {
        self.slots.lock()[id.raw() as usize].pmp.take(region_base)
    }

    /// Returns the addresses ENTER passes to the base module's init convention.
    pub fn launch_info(&self, id: EnclaveId) -> (u64, u64, u64, u64) {
        let slots = self.slots.lock();
        let c = &slots[id.raw() as usize];
        (
            c.anchors.base_pa,
            c.payload_size,
            c.anchors.drv_list,
            c.user_param,
        )
    }
}

// Extent of the base module image linked into the monitor, for copying into new enclaves.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn base_module_image() -> &'static [u8] {
    extern "C" {
        static _base_start: u8;
        static _base_end: u8;
    }
    // Safe: the linker script defines the pair as the bounds of the embedded image.
    unsafe {
        let start = core::ptr::addr_of!(_base_start);
        let end = core::ptr::addr_of!(_base_end);
        core::slice::from_raw_parts(start, end.offset_from(start) as usize)
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn base_module_image() -> &'static [u8] {
    &[]
}

/// CREATE: carve out a slot and a first section, lay out base module + drivers + payload,
/// and leave the enclave in `Load` awaiting ENTER.
pub fn create(
    m: &Monitor,
    hart_id: u64,
    payload_addr: u64,
    payload_size: u64,
    drv_mask: u64,
) -> Result<u64> {
    let id = m.enclaves.reserve_slot(payload_size)?;

    let dir = m.directory(hart_id);
    let pa = match allocate_section(&m.pool, &dir, id, RawAddr::enclave(ENCLAVE_VA_START)) {
        Ok(addr) => addr.bits(),
        Err(e) => {
            m.enclaves.release_slot(id);
            return Err(Error::Section(e));
        }
    };

    // Base module above the user region, selected drivers and their address list after it.
    let image = base_module_image();
    let base_dst = pa + EUSR_MEM_SIZE;
    // Safe: [pa, pa + EMEM_SIZE) was claimed for this enclave above and is zeroed.
    unsafe {
        core::ptr::copy_nonoverlapping(image.as_ptr(), base_dst as *mut u8, image.len());
    }
    let cursor = base_dst + PageSize::Size4k.round_up(image.len() as u64);
    let (drv_list, user_param) = if drv_mask != 0 {
        // Safe: still inside the enclave's fresh section.
        let (list, _) = unsafe { m.drivers.copy_selected(cursor, drv_mask) };
        (list, list + crate::drv::DRV_LIST_BYTES)
    } else {
        (0, cursor)
    };

    // The payload lands at the bottom of the section, read through the caller's
    // translation one access at a time.
    if payload_size > 0 {
        // Safe: the destination is the enclave's user region, exclusively ours until ENTER.
        let dst = unsafe { core::slice::from_raw_parts_mut(pa as *mut u8, payload_size as usize) };
        let src = unsafe { CallerPtr::from_vaddr(payload_addr) };
        copy_from_caller(dst, src);
    }

    m.enclaves
        .set_created(id, pa, drv_list, user_param, NormalWorldCsrs::fresh_for_launch(pa));
    Ok(id.raw())
}

/// ENTER: copy the caller's parameters in, switch protection and context to the enclave,
/// and bind the core. On success the trap frame carries the enclave world; returning to it
/// resumes inside the enclave.
pub fn enter(
    m: &Monitor,
    hart_id: u64,
    regs: &mut TrapFrame,
    raw_id: u64,
    param_len: u64,
    param_addr: u64,
) -> Result<()> {
    let id = EnclaveId::new(raw_id).ok_or(Error::InvalidId)?;
    m.enclaves.begin_enter(id)?;

    let (base_pa, payload_size, drv_list, user_param) = m.enclaves.launch_info(id);
    if param_len > 0 {
        if user_param + param_len > base_pa + EMEM_SIZE {
            return Err(Error::BadParam);
        }
        // Safe: the parameter region lies inside the enclave's section, past the images.
        let dst =
            unsafe { core::slice::from_raw_parts_mut(user_param as *mut u8, param_len as usize) };
        copy_from_caller(dst, unsafe { CallerPtr::from_vaddr(param_addr) });
    }

    pmp::switch_to_enclave(&m.pool, id);

    // The host leaves the core; its world is saved as of this call.
    m.enclaves
        .save_world(EnclaveId::host(), NormalWorldCsrs::capture(regs), &regs.gprs);

    let (csrs, gprs) = m.enclaves.saved_world(id);
    csrs.install(regs);
    regs.gprs = gprs;

    // Launch arguments: init_mem(id, id, mem_start, payload_size, drv_list, argc, argv).
    let a = regs.gprs.a_regs_mut();
    a[0] = id.raw();
    a[1] = id.raw();
    a[2] = base_pa;
    a[3] = payload_size;
    a[4] = drv_list;
    a[5] = param_len;
    a[6] = param_addr;

    m.cores.bind(hart_id, id);
    m.enclaves.commit_enter(id);
    Ok(())
}

/// EXIT: release every section the enclave owns, unbind the core, restore the host world
/// and deliver `retval` in its A0. The slot returns to `Free`.
pub fn exit(
    m: &Monitor,
    hart_id: u64,
    regs: &mut TrapFrame,
    raw_id: u64,
    retval: u64,
) -> Result<()> {
    let id = EnclaveId::new(raw_id).ok_or(Error::InvalidId)?;
    m.enclaves.begin_exit(id)?;

    m.pool.release_all(id);
    m.cores.unbind(hart_id);
    pmp::switch_to_host();

    let (csrs, gprs) = m.enclaves.saved_world(EnclaveId::host());
    csrs.install(regs);
    regs.gprs = gprs;
    regs.gprs.set_reg(GprIndex::A0, retval);

    m.enclaves.commit_exit(id);
    Ok(())
}

/// SUSPEND: save the running enclave's context and hand the core back to the host without
/// releasing any memory. The host's pending call completes with success.
pub fn suspend(m: &Monitor, hart_id: u64, regs: &mut TrapFrame, raw_id: u64) -> Result<()> {
    let id = EnclaveId::new(raw_id).ok_or(Error::InvalidId)?;
    if m.cores.enclave_on(hart_id) != Some(id) {
        return Err(Error::InvalidState);
    }
    m.enclaves.begin_suspend(id)?;

    m.enclaves
        .save_world(id, NormalWorldCsrs::capture(regs), &regs.gprs);
    m.cores.unbind(hart_id);
    pmp::switch_to_host();

    let (csrs, gprs) = m.enclaves.saved_world(EnclaveId::host());
    csrs.install(regs);
    regs.gprs = gprs;
    regs.gprs.set_reg(GprIndex::A0, 0);

    m.enclaves.commit_suspend(id);
    Ok(())
}

/// RESUME: the inverse of SUSPEND. The enclave's own suspend call completes with success.
pub fn resume(m: &Monitor, hart_id: u64, regs: &mut TrapFrame, raw_id: u64) -> Result<()> {
    let id = EnclaveId::new(raw_id).ok_or(Error::InvalidId)?;
    m.enclaves.begin_resume(id)?;

    pmp::switch_to_enclave(&m.pool, id);
    m.enclaves
        .save_world(EnclaveId::host(), NormalWorldCsrs::capture(regs), &regs.gprs);

    let (csrs, gprs) = m.enclaves.saved_world(id);
    csrs.install(regs);
    regs.gprs = gprs;
    regs.gprs.set_reg(GprIndex::A0, 0);

    m.cores.bind(hart_id, id);
    m.enclaves.commit_resume(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_pages::SECTION_SIZE;

    fn table() -> EnclaveTable {
        EnclaveTable::new()
    }

    fn host() -> EnclaveId {
        EnclaveId::host()
    }

    #[test]
    fn host_boots_running() {
        let t = table();
        assert_eq!(t.status_of(host()), EnclaveStatus::Run);
        assert_eq!(
            t.status_of(EnclaveId::new(1).unwrap()),
            EnclaveStatus::Free
        );
    }

    #[test]
    fn oversized_payload_rejected_before_any_slot() {
        let t = table();
        assert_eq!(
            t.reserve_slot(SECTION_SIZE + 1).err(),
            Some(Error::PayloadTooLarge)
        );
        // No slot left Load behind.
        for i in 1..=NUM_ENCLAVE {
            assert_eq!(
                t.status_of(EnclaveId::new(i).unwrap()),
                EnclaveStatus::Free
            );
        }
        // Exactly one section's worth is still acceptable.
        assert!(t.reserve_slot(SECTION_SIZE).is_ok());
    }

    #[test]
    fn slots_are_finite() {
        let t = table();
        for _ in 0..NUM_ENCLAVE {
            t.reserve_slot(0x1000).unwrap();
        }
        assert_eq!(t.reserve_slot(0x1000).err(), Some(Error::NoFreeSlots));
        // Releasing one makes room again.
        t.release_slot(EnclaveId::new(3).unwrap());
        assert_eq!(t.reserve_slot(0x1000).unwrap(), EnclaveId::new(3).unwrap());
    }

    #[test]
    fn enter_requires_load_and_running_host() {
        let t = table();
        let id = t.reserve_slot(0).unwrap();

        t.begin_enter(id).unwrap();
        t.commit_enter(id);
        assert_eq!(t.status_of(id), EnclaveStatus::Run);
        assert_eq!(t.status_of(host()), EnclaveStatus::Idle);

        // Entering a running enclave is illegal and changes nothing.
        assert_eq!(t.begin_enter(id).err(), Some(Error::InvalidState));
        assert_eq!(t.status_of(id), EnclaveStatus::Run);
        assert_eq!(t.status_of(host()), EnclaveStatus::Idle);
    }

    #[test]
    fn exit_only_from_run_with_idle_host() {
        let t = table();
        let id = t.reserve_slot(0).unwrap();

        // Exit from Load is illegal.
        assert_eq!(t.begin_exit(id).err(), Some(Error::InvalidState));
        assert_eq!(t.status_of(id), EnclaveStatus::Load);
        assert_eq!(t.status_of(host()), EnclaveStatus::Run);

        t.begin_enter(id).unwrap();
        t.commit_enter(id);
        t.begin_exit(id).unwrap();
        t.commit_exit(id);
        assert_eq!(t.status_of(id), EnclaveStatus::Free);
        assert_eq!(t.status_of(host()), EnclaveStatus::Run);
    }

    #[test]
    fn suspend_resume_round_trip() {
        let t = table();
        let id = t.reserve_slot(0).unwrap();
        t.begin_enter(id).unwrap();
        t.commit_enter(id);

        // Resume of a running enclave is illegal.
        assert_eq!(t.begin_resume(id).err(), Some(Error::InvalidState));

        t.begin_suspend(id).unwrap();
        t.commit_suspend(id);
        assert_eq!(t.status_of(id), EnclaveStatus::Idle);
        assert_eq!(t.status_of(host()), EnclaveStatus::Run);

        // Suspending again is illegal and changes nothing.
        assert_eq!(t.begin_suspend(id).err(), Some(Error::InvalidState));
        assert_eq!(t.status_of(id), EnclaveStatus::Idle);

        t.begin_resume(id).unwrap();
        t.commit_resume(id);
        assert_eq!(t.status_of(id), EnclaveStatus::Run);
        assert_eq!(t.status_of(host()), EnclaveStatus::Idle);
    }

    #[test]
    fn exit_zeroes_the_control_block() {
        let t = table();
        let id = t.reserve_slot(0x1000).unwrap();
        t.set_created(id, 0xA000_0000, 0xA010_0000, 0xA011_0000, NormalWorldCsrs::default());
        t.begin_enter(id).unwrap();
        t.commit_enter(id);
        t.begin_exit(id).unwrap();
        t.commit_exit(id);

        // A fresh reservation of the same slot sees no leftovers.
        let again = t.reserve_slot(0).unwrap();
        assert_eq!(again, id);
        assert_eq!(t.launch_info(id), (0, 0, 0, 0));
        assert_eq!(t.pmp_slots_free(id), crate::pmp::PMP_REGION_MAX);
    }

    #[test]
    fn registration_is_validated() {
        let t = table();
        let id = t.reserve_slot(0).unwrap();
        let base = 0xA040_0000u64;
        t.set_created(id, base, 0, base + 0x1000, NormalWorldCsrs::default());

        // Null, misaligned, and out-of-range pointers all rejected without effect.
        assert_eq!(
            t.register_maps(id, 0, base + 8, base + 16).err(),
            Some(Error::BadRegistration)
        );
        assert_eq!(
            t.register_maps(id, base + 1, base + 8, base + 16).err(),
            Some(Error::BadRegistration)
        );
        assert_eq!(
            t.register_maps(id, base + EMEM_SIZE, base + 8, base + 16)
                .err(),
            Some(Error::BadRegistration)
        );
        assert_eq!(
            t.with_anchors(id, |a| a.registered()),
            Some(false)
        );

        t.register_maps(id, base, base + 8, base + 16).unwrap();
        assert_eq!(t.with_anchors(id, |a| a.registered()), Some(true));
    }

    #[test]
    fn peri_table_is_bounded() {
        let t = table();
        let id = t.reserve_slot(0).unwrap();
        for i in 0..PERI_REGION_MAX as u64 {
            t.add_peri(
                id,
                PeriRegion {
                    pa: 0x1000_0000 + i * 0x1000,
                    va: 0xF000_0000 + i * 0x1000,
                    size: 0x1000,
                },
            )
            .unwrap();
        }
        assert_eq!(
            t.add_peri(id, PeriRegion::default()).err(),
            Some(Error::PeriTableFull)
        );
    }

    #[test]
    fn anchors_visible_only_for_live_enclaves() {
        let t = table();
        assert!(t.with_anchors(host(), |_| ()).is_none());
        assert!(t
            .with_anchors(EnclaveId::new(2).unwrap(), |_| ())
            .is_none());

        let id = t.reserve_slot(0).unwrap();
        assert!(t.with_anchors(id, |_| ()).is_some());
    }
}
