// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Core-to-enclave binding. Each physical core runs either the host or exactly one enclave;
//! the map records which, and is consulted to resolve the calling context of every
//! privileged call. Guarded by its own lock since lifecycle transitions and memory
//! operations interleave from different cores.

use enclave_pages::EnclaveId;
use spin::Mutex;

use crate::layout::MAX_CORES;

pub struct CoreMap {
    enclave_on_core: Mutex<[Option<EnclaveId>; MAX_CORES]>,
}

impl CoreMap {
    pub const fn new() -> Self {
        Self {
            enclave_on_core: Mutex::new([None; MAX_CORES]),
        }
    }

    /// Returns the enclave resident on `hart_id`, `None` when the host holds the core.
    pub fn enclave_on(&self, hart_id: u64) -> Option<EnclaveId> {
        let cores = self.enclave_on_core.lock();
        cores.get(hart_id as usize).copied().flatten()
    }

    /// Binds `hart_id` to `id` for the duration of an enclave's residence.
    pub fn bind(&self, hart_id: u64, id: EnclaveId) {
        if let Some(slot) = self.enclave_on_core.lock().get_mut(hart_id as usize) {
            *slot = Some(id);
        }
    }

    /// Returns `hart_id` to the host.
    pub fn unbind(&self, hart_id: u64) {
        if let Some(slot) = self.enclave_on_core.lock().get_mut(hart_id as usize) {
            *slot = None;
        }
    }
}

/// Returns the id of the calling hart.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn this_hart_id() -> u64 {
    use machine_regs::CSR;
    use tock_registers::interfaces::Readable;
    CSR.mhartid.get()
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn this_hart_id() -> u64 {
    unimplemented!("hart id on non-riscv host")
}
