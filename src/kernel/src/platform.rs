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

//! The description of the platform the kernel runs on

use bitflags::bitflags;

use base::cfg;
use base::col::{BTreeMap, Vec};
use base::goff;
use base::tcu::PEId;

use core::ops::Range;

/// The type of a PE
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PEType {
    /// A compute PE with an internal memory (scratchpad or cache)
    Comp,
    /// A memory PE without a core
    Mem,
}

bitflags! {
    /// Properties of a PE
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PEFlags : u32 {
        /// The TCU translates virtual addresses via page tables
        const VM            = 1 << 0;
        /// A multiplexer runs on the PE
        const PEMUX         = 1 << 1;
    }
}

/// Describes a single PE
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PEDesc {
    ty: PEType,
    mem_size: goff,
    flags: PEFlags,
}

impl PEDesc {
    pub fn new(ty: PEType, mem_size: goff, flags: PEFlags) -> Self {
        PEDesc {
            ty,
            mem_size,
            flags,
        }
    }

    pub fn pe_type(&self) -> PEType {
        self.ty
    }

    pub fn mem_size(&self) -> goff {
        self.mem_size
    }

    pub fn is_mem(&self) -> bool {
        self.ty == PEType::Mem
    }

    pub fn has_virtmem(&self) -> bool {
        self.flags.contains(PEFlags::VM)
    }

    pub fn supports_pemux(&self) -> bool {
        self.ty == PEType::Comp && self.flags.contains(PEFlags::PEMUX)
    }
}

/// The platform queries the kernel depends on
pub trait Platform {
    /// Returns the PE the kernel runs on
    fn kernel_pe(&self) -> PEId;

    /// Returns all PEs of the platform
    fn pes(&self) -> Vec<PEId>;

    /// Returns the description of the given PE
    fn pe_desc(&self, pe: PEId) -> PEDesc;

    /// Returns whether multiple VPEs may run on the given PE
    fn is_shared(&self, pe: PEId) -> bool;

    /// Returns the region for receive buffers of the given PE, or `None` for memory PEs
    fn def_recvbuf(&self, pe: PEId) -> Option<Range<goff>>;

    /// Returns the address of the multiplexer's receive buffers on the given PE
    fn rbuf_pemux(&self, pe: PEId) -> goff {
        self.def_recvbuf(pe).map(|r| r.start).unwrap_or(0)
    }
}

/// A static platform description
pub struct PlatformDesc {
    kernel_pe: PEId,
    pes: BTreeMap<PEId, PEDesc>,
    shared: Vec<PEId>,
}

impl PlatformDesc {
    pub fn new(kernel_pe: PEId) -> Self {
        PlatformDesc {
            kernel_pe,
            pes: BTreeMap::new(),
            shared: Vec::new(),
        }
    }

    /// Adds the given PE
    pub fn add_pe(mut self, pe: PEId, desc: PEDesc) -> Self {
        self.pes.insert(pe, desc);
        self
    }

    /// Marks the given PE as shared between multiple VPEs
    pub fn shared(mut self, pe: PEId) -> Self {
        self.shared.push(pe);
        self
    }
}

impl Platform for PlatformDesc {
    fn kernel_pe(&self) -> PEId {
        self.kernel_pe
    }

    fn pes(&self) -> Vec<PEId> {
        self.pes.keys().copied().collect()
    }

    fn pe_desc(&self, pe: PEId) -> PEDesc {
        self.pes
            .get(&pe)
            .copied()
            .unwrap_or_else(|| PEDesc::new(PEType::Mem, 0, PEFlags::empty()))
    }

    fn is_shared(&self, pe: PEId) -> bool {
        self.shared.contains(&pe)
    }

    fn def_recvbuf(&self, pe: PEId) -> Option<Range<goff>> {
        let desc = self.pe_desc(pe);
        if desc.is_mem() {
            None
        }
        else if desc.has_virtmem() {
            Some(cfg::RECVBUF_SPACE..cfg::RECVBUF_SPACE + cfg::RECVBUF_SIZE)
        }
        else {
            let end = desc.mem_size();
            Some(end - cfg::RECVBUF_SIZE_SPM..end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recvbuf_regions() {
        let plat = PlatformDesc::new(0)
            .add_pe(0, PEDesc::new(PEType::Comp, 0x10_0000, PEFlags::empty()))
            .add_pe(1, PEDesc::new(PEType::Comp, 0x10_0000, PEFlags::VM | PEFlags::PEMUX))
            .add_pe(2, PEDesc::new(PEType::Mem, 0x100_0000, PEFlags::empty()))
            .shared(1);

        assert_eq!(plat.pes(), vec![0, 1, 2]);
        assert_eq!(plat.def_recvbuf(0), Some(0x10_0000 - 0xE000..0x10_0000));
        assert_eq!(
            plat.def_recvbuf(1),
            Some(cfg::RECVBUF_SPACE..cfg::RECVBUF_SPACE + cfg::RECVBUF_SIZE)
        );
        assert_eq!(plat.def_recvbuf(2), None);
        assert_eq!(plat.rbuf_pemux(1), cfg::RECVBUF_SPACE);

        assert!(plat.pe_desc(1).supports_pemux());
        assert!(!plat.pe_desc(0).has_virtmem());
        assert!(plat.is_shared(1) && !plat.is_shared(0));
        // unknown PEs are treated as memory without capacity
        assert!(plat.pe_desc(7).is_mem());
    }
}
