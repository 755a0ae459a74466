// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The privileged-call dispatcher. Every call body runs end to end under one coarse lock:
//! this is a narrow trusted choke point, not a throughput path, and the single critical
//! section keeps every cross-table invariant trivially intact. The finer pool/table/core
//! locks below it exist for the few paths that run outside a call (bring-up, trap glue).

use ebi::{EbiMessage, EbiReturn, Error as EbiError};
use enclave_pages::SECTION_SIZE;
use machine_regs::{discard_dcache, flush_dcache, TrapFrame};
use section_tracking::{allocate_section, allocate_section_for_host};
use spin::Mutex;

use crate::enclave::{self, Error as EnclaveError, PeriRegion};
use crate::monitor::Monitor;

static DISPATCH_LOCK: Mutex<()> = Mutex::new(());

fn enclave_error_code(e: EnclaveError) -> EbiError {
    match e {
        EnclaveError::PayloadTooLarge | EnclaveError::BadParam => EbiError::InvalidParam,
        EnclaveError::NoFreeSlots | EnclaveError::PeriTableFull => EbiError::OutOfSlots,
        EnclaveError::InvalidId => EbiError::InvalidParam,
        EnclaveError::InvalidState => EbiError::InvalidState,
        EnclaveError::BadRegistration => EbiError::InvalidAddress,
        EnclaveError::Section(e) => section_error_code(e),
    }
}

fn section_error_code(e: section_tracking::Error) -> EbiError {
    use section_tracking::Error::*;
    match e {
        OutOfMemory => EbiError::OutOfMemory,
        InvalidSection(_) | MisalignedPool | InvalidPoolSize => EbiError::InvalidAddress,
        // Invariant violations surface as plain failures; the operation mutated nothing.
        SectionOwned(_) | SectionFree(_) | HostOwned(_) | MissingContext | BadRootPointer => {
            EbiError::Failed
        }
    }
}

/// Handles one privileged call from the world whose state is in `regs`. Results land in the
/// caller's A0..A2 per the interface convention; ENTER/EXIT/SUSPEND/RESUME rewrite the whole
/// frame when they switch worlds.
pub fn handle_ecall(m: &Monitor, hart_id: u64, regs: &mut TrapFrame) {
    let _dispatch = DISPATCH_LOCK.lock();

    let msg = match EbiMessage::from_regs(&regs.gprs) {
        Ok(msg) => msg,
        Err(e) => {
            EbiReturn::from(e).write_to_regs(&mut regs.gprs);
            return;
        }
    };

    let ret = match msg {
        EbiMessage::Create {
            payload_addr,
            payload_size,
            drv_mask,
        } => enclave::create(m, hart_id, payload_addr, payload_size, drv_mask)
            .map(|id| EbiReturn::success(id, 0))
            .map_err(enclave_error_code),

        EbiMessage::Enter {
            id,
            param_len,
            param_addr,
        } => match enclave::enter(m, hart_id, regs, id, param_len, param_addr) {
            // The frame now carries the enclave world; nothing more to write.
            Ok(()) => return,
            Err(e) => Err(enclave_error_code(e)),
        },

        EbiMessage::Exit { id, retval } => match enclave::exit(m, hart_id, regs, id, retval) {
            Ok(()) => return,
            Err(e) => Err(enclave_error_code(e)),
        },

        EbiMessage::Suspend { id } => match enclave::suspend(m, hart_id, regs, id) {
            Ok(()) => return,
            Err(e) => Err(enclave_error_code(e)),
        },

        EbiMessage::Resume { id } => match enclave::resume(m, hart_id, regs, id) {
            Ok(()) => return,
            Err(e) => Err(enclave_error_code(e)),
        },

        EbiMessage::MemAlloc { va } => {
            let dir = m.directory(hart_id);
            let result = match m.cores.enclave_on(hart_id) {
                Some(id) => {
                    allocate_section(&m.pool, &dir, id, enclave_pages::RawAddr::enclave(va))
                }
                // A call from an unbound core is the host asking for its own memory.
                None => allocate_section_for_host(&m.pool, &dir),
            };
            result
                .map(|pa| EbiReturn::success(pa.bits(), SECTION_SIZE))
                .map_err(section_error_code)
        }

        EbiMessage::MapRegister {
            pt_root_ptr,
            inverse_map_ptr,
            offset_ptr,
        } => match m.cores.enclave_on(hart_id) {
            Some(id) => m
                .enclaves
                .register_maps(id, pt_root_ptr, inverse_map_ptr, offset_ptr)
                .map(|_| EbiReturn::success(0, 0))
                .map_err(enclave_error_code),
            None => Err(EbiError::InvalidState),
        },

        EbiMessage::PeriInform { pa, va, size } => match m.cores.enclave_on(hart_id) {
            Some(id) => m
                .enclaves
                .add_peri(id, PeriRegion { pa, va, size })
                .map(|_| EbiReturn::success(0, 0))
                .map_err(enclave_error_code),
            None => Err(EbiError::InvalidState),
        },

        EbiMessage::FlushDcache => {
            flush_dcache();
            Ok(EbiReturn::success(0, 0))
        }

        EbiMessage::DiscardDcache => {
            discard_dcache();
            Ok(EbiReturn::success(0, 0))
        }
    };

    match ret {
        Ok(r) => r.write_to_regs(&mut regs.gprs),
        Err(e) => EbiReturn::from(e).write_to_regs(&mut regs.gprs),
    }
}
