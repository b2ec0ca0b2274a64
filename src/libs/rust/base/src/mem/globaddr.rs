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

use core::fmt;
use core::ops;

use crate::goff;
use crate::serialize::{Deserialize, Serialize};
use crate::tcu::PEId;

const PE_SHIFT: u64 = 56;
const PE_OFFSET: u64 = 0x80;

/// Represents a global address, which is a combination of a PE id and an offset within the PE.
///
/// Global addresses are what page-table entries contain: the upper byte selects the tile (with
/// the highest bit set), the rest is the offset within the tile's memory.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct GlobAddr {
    val: u64,
}

impl GlobAddr {
    /// Creates a new global address from the given raw value
    pub const fn new(addr: u64) -> GlobAddr {
        GlobAddr { val: addr }
    }

    /// Creates a new global address from the given PE id and offset
    pub const fn new_with(pe: PEId, off: goff) -> GlobAddr {
        Self::new(((PE_OFFSET + pe as u64) << PE_SHIFT) | off)
    }

    /// Returns the raw value
    pub const fn raw(self) -> u64 {
        self.val
    }

    /// Returns whether a PE id is set
    pub const fn has_pe(self) -> bool {
        self.val >= (PE_OFFSET << PE_SHIFT)
    }

    /// Returns the PE id
    pub const fn pe(self) -> PEId {
        ((self.val >> PE_SHIFT) - PE_OFFSET) as PEId
    }

    /// Returns the offset
    pub const fn offset(self) -> goff {
        self.val & ((1 << PE_SHIFT) - 1)
    }
}

impl fmt::Debug for GlobAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_pe() {
            write!(f, "G[PE{}+{:#x}]", self.pe(), self.offset())
        }
        else {
            write!(f, "G[{:#x}]", self.raw())
        }
    }
}

impl ops::Add<goff> for GlobAddr {
    type Output = GlobAddr;

    fn add(self, rhs: goff) -> Self::Output {
        GlobAddr::new(self.val + rhs)
    }
}
