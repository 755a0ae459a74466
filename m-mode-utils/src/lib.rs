// Copyright (c) 2023 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#![no_std]

//! Shared helpers for machine-mode firmware: the system console and abort.

pub mod abort;
pub mod print;
