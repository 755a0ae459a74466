// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Message parsing for the enclave call interface ("EBI"), the vendor extension through
//! which the host OS and running enclaves reach the monitor. A7 selects the extension, A6
//! the function, A0..A2 carry the arguments; results return in A0 (negative error codes) and
//! A1/A2 where a function produces values. This crate is pure register-level encode/decode;
//! it owns no policy.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

use machine_regs::{GeneralPurposeRegisters, GprIndex};

/// Extension id of the enclave interface, "EBI" in ASCII.
pub const EXT_EBI: u64 = 0x45_4249;

pub const FID_CREATE: u64 = 0;
pub const FID_ENTER: u64 = 1;
pub const FID_EXIT: u64 = 2;
pub const FID_SUSPEND: u64 = 3;
pub const FID_RESUME: u64 = 4;
pub const FID_MEM_ALLOC: u64 = 5;
pub const FID_MAP_REGISTER: u64 = 6;
pub const FID_PERI_INFORM: u64 = 7;
pub const FID_FLUSH_DCACHE: u64 = 8;
pub const FID_DISCARD_DCACHE: u64 = 9;

pub const EBI_SUCCESS: i64 = 0;

/// Errors passed over the call interface as negative codes in A0.
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Generic failure in execution of the call.
    Failed = -1,
    /// Extension or function is not supported.
    NotSupported = -2,
    /// Parameter passed isn't valid.
    InvalidParam = -3,
    /// Address passed is invalid.
    InvalidAddress = -4,
    /// No memory could be found for the request, even after compaction.
    OutOfMemory = -5,
    /// A fixed table (enclave slots, PMP regions, peripheral records) is full.
    OutOfSlots = -6,
    /// The enclave or host is not in a state that permits the transition.
    InvalidState = -7,
}

impl Error {
    /// Parse the given error code to an `Error` enum.
    pub fn from_code(e: i64) -> Self {
        use Error::*;
        match e {
            -2 => NotSupported,
            -3 => InvalidParam,
            -4 => InvalidAddress,
            -5 => OutOfMemory,
            -6 => OutOfSlots,
            -7 => InvalidState,
            _ => Failed,
        }
    }

    /// Convert `Self` to a 64bit error code to be returned in A0.
    pub fn to_code(&self) -> i64 {
        *self as i64
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// A decoded call to the enclave interface. One variant per function id; arguments follow
/// the register convention in the variant docs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EbiMessage {
    /// Creates a new enclave from the caller's payload.
    /// a0 = payload address (caller VA), a1 = payload size, a2 = driver bitmask.
    Create {
        payload_addr: u64,
        payload_size: u64,
        drv_mask: u64,
    },
    /// Switches the calling core into a loaded enclave.
    /// a0 = enclave id, a1 = parameter length, a2 = parameter address (caller VA).
    Enter {
        id: u64,
        param_len: u64,
        param_addr: u64,
    },
    /// Tears the enclave down and returns to the host.
    /// a0 = enclave id, a1 = value delivered to the host's A0.
    Exit { id: u64, retval: u64 },
    /// Saves the running enclave's context and returns the core to the host, keeping the
    /// enclave's memory. a0 = enclave id.
    Suspend { id: u64 },
    /// Re-enters a suspended enclave. a0 = enclave id.
    Resume { id: u64 },
    /// Allocates one section for the calling enclave. a0 = requested VA. Returns the
    /// physical base in A1 and the section size in A2.
    MemAlloc { va: u64 },
    /// Records the enclave's self-reported bookkeeping pointers.
    /// a0 = &page-table root, a1 = &inverse map, a2 = &VA-PA offset; all physical.
    MapRegister {
        pt_root_ptr: u64,
        inverse_map_ptr: u64,
        offset_ptr: u64,
    },
    /// Records a peripheral mapping held by the calling enclave.
    /// a0 = physical address, a1 = virtual address, a2 = size.
    PeriInform { pa: u64, va: u64, size: u64 },
    /// Writes back the L1 D-cache.
    FlushDcache,
    /// Discards the L1 D-cache without write-back.
    DiscardDcache,
}

impl EbiMessage {
    /// Creates an `EbiMessage` from the given GPRs. Intended for use from the ECALL handler,
    /// passed the saved register state of the calling world. A7 must hold `EXT_EBI`.
    pub fn from_regs(gprs: &GeneralPurposeRegisters) -> Result<Self> {
        if gprs.reg(GprIndex::A7) != EXT_EBI {
            return Err(Error::NotSupported);
        }
        let args = gprs.a_regs();
        use EbiMessage::*;
        match args[6] {
            FID_CREATE => Ok(Create {
                payload_addr: args[0],
                payload_size: args[1],
                drv_mask: args[2],
            }),
            FID_ENTER => Ok(Enter {
                id: args[0],
                param_len: args[1],
                param_addr: args[2],
            }),
            FID_EXIT => Ok(Exit {
                id: args[0],
                retval: args[1],
            }),
            FID_SUSPEND => Ok(Suspend { id: args[0] }),
            FID_RESUME => Ok(Resume { id: args[0] }),
            FID_MEM_ALLOC => Ok(MemAlloc { va: args[0] }),
            FID_MAP_REGISTER => Ok(MapRegister {
                pt_root_ptr: args[0],
                inverse_map_ptr: args[1],
                offset_ptr: args[2],
            }),
            FID_PERI_INFORM => Ok(PeriInform {
                pa: args[0],
                va: args[1],
                size: args[2],
            }),
            FID_FLUSH_DCACHE => Ok(FlushDcache),
            FID_DISCARD_DCACHE => Ok(DiscardDcache),
            _ => Err(Error::NotSupported),
        }
    }

    /// Returns the function id for this message.
    pub fn a6(&self) -> u64 {
        use EbiMessage::*;
        match self {
            Create { .. } => FID_CREATE,
            Enter { .. } => FID_ENTER,
            Exit { .. } => FID_EXIT,
            Suspend { .. } => FID_SUSPEND,
            Resume { .. } => FID_RESUME,
            MemAlloc { .. } => FID_MEM_ALLOC,
            MapRegister { .. } => FID_MAP_REGISTER,
            PeriInform { .. } => FID_PERI_INFORM,
            FlushDcache => FID_FLUSH_DCACHE,
            DiscardDcache => FID_DISCARD_DCACHE,
        }
    }
}

/// The register-level result of a handled call: an error code for A0 and up to two produced
/// values for A1/A2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EbiReturn {
    pub error_code: i64,
    pub a1: u64,
    pub a2: u64,
}

impl EbiReturn {
    pub fn success(a1: u64, a2: u64) -> Self {
        Self {
            error_code: EBI_SUCCESS,
            a1,
            a2,
        }
    }

    /// Writes the return values into the caller's saved registers.
    pub fn write_to_regs(&self, gprs: &mut GeneralPurposeRegisters) {
        gprs.set_reg(GprIndex::A0, self.error_code as u64);
        gprs.set_reg(GprIndex::A1, self.a1);
        gprs.set_reg(GprIndex::A2, self.a2);
    }
}

impl From<Result<u64>> for EbiReturn {
    fn from(result: Result<u64>) -> EbiReturn {
        match result {
            Ok(rv) => Self::success(rv, 0),
            Err(e) => Self::from(e),
        }
    }
}

impl From<Error> for EbiReturn {
    fn from(error: Error) -> EbiReturn {
        EbiReturn {
            error_code: error.to_code(),
            a1: 0,
            a2: 0,
        }
    }
}
