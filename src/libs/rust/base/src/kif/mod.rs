/*
 * Copyright (C) 2018-2024 Nils Asmussen, Barkhausen Institut
 *
 * This file is part of M3 (Microkernel-based SysteM for Heterogeneous Manycores).
 *
 * M3 is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * M3 is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

//! Contains the kernel interface definitions

mod perm;

pub mod pemux;

pub use self::perm::*;

use crate::serialize::{Deserialize, Serialize};

/// The default reply message that only contains the error code
#[derive(Debug, Serialize, Deserialize)]
#[repr(C)]
pub struct DefaultReply {
    pub error: crate::errors::Code,
}
