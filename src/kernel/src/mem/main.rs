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

use base::col::Vec;
use base::errors::{Code, Error};
use base::goff;
use base::mem::GlobAddr;

use core::cmp;
use core::fmt;

use crate::mem::{MemMod, MemType};
use crate::platform::Platform;

/// A piece of memory that has been allocated from a [`MemMod`]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Allocation {
    gaddr: GlobAddr,
    size: goff,
}

impl Allocation {
    pub fn new(gaddr: GlobAddr, size: goff) -> Self {
        Allocation { gaddr, size }
    }

    pub fn global(&self) -> GlobAddr {
        self.gaddr
    }

    pub fn size(&self) -> goff {
        self.size
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alloc[addr={:?}, size={:#x}]", self.gaddr, self.size)
    }
}

/// The memory of all memory PEs, split into modules
#[derive(Default)]
pub struct MainMemory {
    mods: Vec<MemMod>,
}

impl MainMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the memory from all memory PEs of the platform
    ///
    /// The first `kmem` bytes are reserved for the kernel; everything else is user memory.
    pub fn from_platform(platform: &dyn Platform, kmem: goff) -> Self {
        let mut mem = Self::new();
        let mut kmem_left = kmem;
        for pe in platform.pes() {
            let desc = platform.pe_desc(pe);
            if !desc.is_mem() || desc.mem_size() == 0 {
                continue;
            }

            let kern = cmp::min(kmem_left, desc.mem_size());
            if kern > 0 {
                mem.add(MemMod::new(MemType::Kernel, pe, 0, kern));
                kmem_left -= kern;
            }
            if desc.mem_size() > kern {
                mem.add(MemMod::new(MemType::User, pe, kern, desc.mem_size() - kern));
            }
        }
        mem
    }

    pub fn mods(&self) -> &[MemMod] {
        &self.mods
    }

    pub fn add(&mut self, m: MemMod) {
        self.mods.push(m)
    }

    pub fn allocate(
        &mut self,
        mtype: MemType,
        size: goff,
        align: goff,
    ) -> Result<Allocation, Error> {
        for m in &mut self.mods {
            if m.mem_type() != mtype {
                continue;
            }

            if let Ok(gaddr) = m.allocate(size, align) {
                klog!(MEM, "Allocated {:#x} bytes at {:?}", size, gaddr);
                return Ok(Allocation::new(gaddr, size));
            }
        }
        Err(Error::new(Code::OutOfMem))
    }

    pub fn free(&mut self, alloc: &Allocation) {
        for m in &mut self.mods {
            if m.free(alloc.gaddr, alloc.size) {
                klog!(MEM, "Freed {:#x} bytes at {:?}", alloc.size, alloc.gaddr);
                break;
            }
        }
    }

    pub fn capacity(&self) -> goff {
        self.mods.iter().map(|m| m.capacity()).sum()
    }

    pub fn available(&self) -> goff {
        self.mods
            .iter()
            .filter(|m| m.mem_type() != MemType::Occupied)
            .map(|m| m.available())
            .sum()
    }
}

impl fmt::Debug for MainMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "size: {:#x}, available: {:#x}, mods: [",
            self.capacity(),
            self.available()
        )?;
        for m in &self.mods {
            writeln!(f, "  {:?}", m)?;
        }
        write!(f, "]")
    }
}
