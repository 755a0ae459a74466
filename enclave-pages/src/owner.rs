// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// Number of enclave slots. Slot 0 is reserved for the host context, so valid enclave IDs are
/// `1..=NUM_ENCLAVE`.
pub const NUM_ENCLAVE: u64 = 16;

/// `EnclaveId` identifies the execution context that owns a section or an enclave slot.
/// The host (the untrusted OS running in S-mode) is special cased as slot 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EnclaveId {
    id: u64,
}

impl EnclaveId {
    const HOST: u64 = 0;

    /// Creates a new `EnclaveId` from the given raw slot number. Returns `None` for the host
    /// slot and for values beyond the last enclave slot; those can never name an enclave.
    pub fn new(id: u64) -> Option<Self> {
        if id == Self::HOST || id > NUM_ENCLAVE {
            None
        } else {
            Some(Self { id })
        }
    }

    /// Returns the ID of the host context.
    pub fn host() -> Self {
        Self { id: Self::HOST }
    }

    /// Returns true if this is the host context.
    pub fn is_host(&self) -> bool {
        self.id == Self::HOST
    }

    /// Returns the raw slot number.
    pub fn raw(&self) -> u64 {
        self.id
    }
}

/// `AddressSpace` identifies the address space that a raw address is in.
pub trait AddressSpace: Clone + Copy {}

/// Represents the machine-physical address space, the only one the monitor dereferences.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MachinePhys;

impl AddressSpace for MachinePhys {}

/// Represents an enclave's virtual address space. The monitor never dereferences these; they
/// are only meaningful as page-table lookup keys for the enclave that registered them.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EnclaveVirt;

impl AddressSpace for EnclaveVirt {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_validation() {
        assert!(EnclaveId::new(0).is_none());
        assert!(EnclaveId::new(1).is_some());
        assert!(EnclaveId::new(NUM_ENCLAVE).is_some());
        assert!(EnclaveId::new(NUM_ENCLAVE + 1).is_none());
        assert!(EnclaveId::host().is_host());
        assert!(!EnclaveId::new(3).unwrap().is_host());
    }
}
