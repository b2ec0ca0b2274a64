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

use base::errors::Error;
use base::goff;
use base::mem::{GlobAddr, MemMap};
use base::tcu::PEId;

use core::fmt;

/// What a memory module is used for
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemType {
    /// Memory for the kernel, including page tables
    Kernel,
    /// Memory that is handed out to applications
    User,
    /// Memory that is already in use
    Occupied,
}

/// A contiguous part of a memory PE
pub struct MemMod {
    gaddr: GlobAddr,
    size: goff,
    map: MemMap<goff>,
    ty: MemType,
}

impl MemMod {
    pub fn new(ty: MemType, pe: PEId, offset: goff, size: goff) -> Self {
        MemMod {
            gaddr: GlobAddr::new_with(pe, offset),
            size,
            map: MemMap::new(0, size),
            ty,
        }
    }

    pub fn mem_type(&self) -> MemType {
        self.ty
    }

    pub fn addr(&self) -> GlobAddr {
        self.gaddr
    }

    pub fn capacity(&self) -> goff {
        self.size
    }

    pub fn available(&self) -> goff {
        self.map.size().0
    }

    pub fn allocate(&mut self, size: goff, align: goff) -> Result<GlobAddr, Error> {
        self.map.allocate(size, align).map(|addr| self.gaddr + addr)
    }

    /// Frees the given area, if it belongs to this module
    pub fn free(&mut self, addr: GlobAddr, size: goff) -> bool {
        let start = self.gaddr.offset();
        if addr.pe() == self.gaddr.pe()
            && addr.offset() >= start
            && addr.offset() + size <= start + self.size
        {
            self.map.free(addr.offset() - start, size);
            true
        }
        else {
            false
        }
    }
}

impl fmt::Debug for MemMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemMod[type: {:?}, addr: {:?}, size: {:#x}, available: {:#x}]",
            self.ty,
            self.gaddr,
            self.capacity(),
            self.available(),
        )
    }
}
