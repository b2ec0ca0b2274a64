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

use base::cfg;
use base::errors::{Code, Error};
use base::goff;
use base::kif::Perm;
use base::mem::GlobAddr;
use base::tcu::{EpId, ExtReg, FeatureFlags, Reg, VPEId, INVALID_EP};

use paging::{LEVEL_CNT, PTE_REC_IDX, PTE_SIZE};

use crate::aspace::{PageTableWalker, WalkMode};
use crate::pes::{State, TileAddr, VPEInfo};
use crate::Kernel;

/// Maps and unmaps pages in the address spaces of VPEs
pub struct AddrSpaceMapper<'k> {
    kern: &'k Kernel,
}

impl<'k> AddrSpaceMapper<'k> {
    pub fn new(kern: &'k Kernel) -> Self {
        AddrSpaceMapper { kern }
    }

    fn walker(&self, info: &VPEInfo, root: GlobAddr) -> PageTableWalker<'k> {
        let vm = self.kern.platform().pe_desc(info.pe).has_virtmem();
        // the kernel's own address space is always active
        let active = info.pe == self.kern.platform().kernel_pe() || info.state == State::Running;
        let (mode, tlb) = if vm && active {
            let target = TileAddr::new(info.pe, info.id);
            (WalkMode::Live(target), Some(target))
        }
        else {
            // without a running VPE, the TLB holds no translations of this address space
            (WalkMode::Parked { root }, None)
        };
        PageTableWalker::new(self.kern.ktcu(), self.kern.mem(), mode, tlb)
    }

    fn lookup(&self, vpe: VPEId) -> Result<Option<(VPEInfo, GlobAddr)>, Error> {
        let info = self
            .kern
            .vpes()
            .vpe(vpe)
            .ok_or_else(|| Error::new(Code::VPEGone))?;
        // nobody will ever use the address space again
        if info.state == State::Dead {
            return Ok(None);
        }
        let root = info.root_pt.ok_or_else(|| Error::new(Code::NotSup))?;
        Ok(Some((info, root)))
    }

    fn check_range(virt: goff, pages: usize) -> Result<(), Error> {
        let end = (pages as goff)
            .checked_mul(cfg::PAGE_SIZE as goff)
            .and_then(|size| virt.checked_add(size))
            .ok_or_else(|| Error::new(Code::InvArgs))?;
        if end - 1 > paging::va_mask(LEVEL_CNT) {
            return Err(Error::new(Code::InvArgs));
        }
        Ok(())
    }

    /// Maps `pages` pages starting at `virt` to `phys` with permissions `perm`
    ///
    /// Fails with `InvArgs` if the pages exceed the virtual address space.
    pub fn map(
        &self,
        vpe: VPEId,
        virt: goff,
        phys: GlobAddr,
        pages: usize,
        perm: Perm,
    ) -> Result<(), Error> {
        let (info, root) = match self.lookup(vpe)? {
            Some(r) => r,
            None => return Ok(()),
        };
        if pages == 0 {
            return Ok(());
        }
        Self::check_range(virt, pages)?;

        klog!(
            PTES,
            "VPE{}: mapping {:#x}..{:#x} to {:?} with {:?}",
            vpe,
            virt,
            virt + (pages * cfg::PAGE_SIZE) as goff - 1,
            phys,
            perm
        );

        self.map_pages(&self.walker(&info, root), virt, phys.raw(), pages, perm)
    }

    /// Removes the mappings of `pages` pages starting at `virt`
    pub fn unmap(&self, vpe: VPEId, virt: goff, pages: usize) -> Result<(), Error> {
        let (info, root) = match self.lookup(vpe)? {
            Some(r) => r,
            None => return Ok(()),
        };
        if pages == 0 {
            return Ok(());
        }
        Self::check_range(virt, pages)?;

        klog!(
            PTES,
            "VPE{}: unmapping {:#x}..{:#x}",
            vpe,
            virt,
            virt + (pages * cfg::PAGE_SIZE) as goff - 1
        );

        self.map_pages(&self.walker(&info, root), virt, 0, pages, Perm::empty())
    }

    fn map_pages(
        &self,
        walker: &PageTableWalker<'_>,
        mut virt: goff,
        mut phys: goff,
        mut pages: usize,
        perm: Perm,
    ) -> Result<(), Error> {
        while pages > 0 {
            for level in (0..LEVEL_CNT).rev() {
                let loc = walker.locate_entry(virt, level)?;
                let pte = walker.read(loc)?;

                if level > 0 {
                    if walker.create_missing_table(loc, pte, level, perm)? {
                        return Ok(());
                    }
                }
                else if walker.materialize_leaf_entries(
                    loc, pte, &mut virt, &mut phys, &mut pages, perm,
                )? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Prepares the address space of `vpe` and installs it on its tile
    ///
    /// The root table is cleared and receives the recursive entry. Page faults are reported to
    /// `pf_ep`, if given.
    pub fn init_aspace(&self, vpe: VPEId, pf_ep: Option<EpId>) -> Result<(), Error> {
        let (info, root) = self
            .lookup(vpe)?
            .ok_or_else(|| Error::new(Code::VPEGone))?;
        let ktcu = self.kern.ktcu();

        let root_tile = TileAddr::tile(root.pe());
        ktcu.clear(root_tile, root.offset(), cfg::PAGE_SIZE)?;
        let rec = paging::build_table(root.raw());
        klog!(PTES, "VPE{}: lvl {} recursive pte: {:#x}", vpe, LEVEL_CNT - 1, rec);
        ktcu.write_word(
            root_tile,
            root.offset() + (PTE_REC_IDX * PTE_SIZE) as goff,
            rec,
        )?;

        let tile = TileAddr::tile(info.pe);
        let mut features = FeatureFlags::empty();
        if self.kern.platform().pe_desc(info.pe).has_virtmem() {
            features |= FeatureFlags::VM;
        }
        ktcu.write_ext_regs(tile, ExtReg::Features, &[features.bits()])?;
        ktcu.write_ext_regs(tile, ExtReg::RootPT, &[
            root.raw(),
            pf_ep.unwrap_or(INVALID_EP) as Reg,
        ])?;
        ktcu.invalidate_tlb_remote(tile)
    }
}
