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

use base::cell::RefCell;
use base::cfg;
use base::col::Vec;
use base::errors::{Code, Error};
use base::goff;
use base::kif::Perm;
use base::math;
use base::mem::GlobAddr;

use core::cmp;

use paging::{PTEFlags, LEVEL_CNT, PTE, PTE_REC_IDX, PTE_SIZE};

use crate::ktcu::KTcu;
use crate::mem::{MainMemory, MemType};
use crate::pes::TileAddr;

/// How the page tables of a VPE are reached
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WalkMode {
    /// The VPE runs at the given tile; entries are accessed through the recursive entry
    Live(TileAddr),
    /// The VPE is not running; entries are found by walking the tables from `root`
    Parked { root: GlobAddr },
}

/// The location of a page-table entry
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntryLoc {
    pub target: TileAddr,
    pub addr: goff,
}

/// Locates, creates and updates the page-table entries of one address space
pub struct PageTableWalker<'k> {
    ktcu: &'k KTcu,
    mem: &'k RefCell<MainMemory>,
    mode: WalkMode,
    // the tile whose TLB caches the translations, if it has virtual memory
    tlb: Option<TileAddr>,
}

impl<'k> PageTableWalker<'k> {
    pub fn new(
        ktcu: &'k KTcu,
        mem: &'k RefCell<MainMemory>,
        mode: WalkMode,
        tlb: Option<TileAddr>,
    ) -> Self {
        PageTableWalker {
            ktcu,
            mem,
            mode,
            tlb,
        }
    }

    pub fn mode(&self) -> WalkMode {
        self.mode
    }

    /// Returns the location of the entry for `virt` in the table at `level`
    ///
    /// In parked mode, all tables above `level` have to exist.
    pub fn locate_entry(&self, virt: goff, level: usize) -> Result<EntryLoc, Error> {
        match self.mode {
            WalkMode::Live(target) => Ok(EntryLoc {
                target,
                addr: paging::recursive_entry_address(LEVEL_CNT, PTE_REC_IDX, virt, level),
            }),

            WalkMode::Parked { root } => {
                let mut table = root;
                for lvl in (level + 1..LEVEL_CNT).rev() {
                    let entry = table + (paging::pte_index(virt, lvl) * PTE_SIZE) as goff;
                    let pte = self.read_entry(entry)?;
                    if (paging::pte_flags(pte) & PTEFlags::RWX).is_empty() {
                        return Err(Error::new(Code::InvArgs));
                    }
                    table = GlobAddr::new(paging::pte_addr(pte));
                }

                let entry = table + (paging::pte_index(virt, level) * PTE_SIZE) as goff;
                Ok(EntryLoc {
                    target: TileAddr::tile(entry.pe()),
                    addr: entry.offset(),
                })
            },
        }
    }

    pub fn read(&self, loc: EntryLoc) -> Result<PTE, Error> {
        self.ktcu.read_word(loc.target, loc.addr)
    }

    fn read_entry(&self, entry: GlobAddr) -> Result<PTE, Error> {
        self.ktcu.read_word(TileAddr::tile(entry.pe()), entry.offset())
    }

    /// Creates the table the entry `pte` at `loc` should point to, unless it exists already
    ///
    /// Returns true if the entry is absent and nothing needs to be done because `perm` is empty
    /// (there is nothing to unmap below a missing table).
    pub fn create_missing_table(
        &self,
        loc: EntryLoc,
        pte: PTE,
        level: usize,
        perm: Perm,
    ) -> Result<bool, Error> {
        if !(paging::pte_flags(pte) & PTEFlags::RWX).is_empty() {
            return Ok(false);
        }
        if perm.is_empty() {
            return Ok(true);
        }

        let table = self
            .mem
            .borrow_mut()
            .allocate(MemType::Kernel, cfg::PAGE_SIZE as goff, cfg::PAGE_SIZE as goff)?
            .global();
        self.ktcu
            .clear(TileAddr::tile(table.pe()), table.offset(), cfg::PAGE_SIZE)?;

        let npte = paging::build_table(table.raw());
        klog!(
            PTES,
            "{:?}: lvl {} pte for {:?}: {:#x}",
            loc.target,
            level,
            table,
            npte
        );
        self.ktcu.write_word(loc.target, loc.addr, npte)?;
        Ok(false)
    }

    /// Writes the leaf entries for the run of pages starting at `*virt`, beginning with the entry
    /// at `loc` that currently contains `pte`
    ///
    /// The run ends with the last entry of the table or after `*pages` pages. `virt`, `phys` and
    /// `pages` are advanced accordingly. Returns true if the first entry already has the desired
    /// value, in which case all following entries are assumed to be up to date as well.
    pub fn materialize_leaf_entries(
        &self,
        loc: EntryLoc,
        pte: PTE,
        virt: &mut goff,
        phys: &mut goff,
        pages: &mut usize,
        perm: Perm,
    ) -> Result<bool, Error> {
        let mut npte = paging::build_leaf(*phys, PTEFlags::from(perm));

        let old = paging::pte_addr(pte) | (paging::pte_flags(pte) & PTEFlags::IRWX).bits();
        if old == npte {
            klog!(
                PTES,
                "{:?}: pte for {:#x} already up to date: {:#x}",
                loc.target,
                *virt,
                pte
            );
            return Ok(true);
        }

        let invalidate = self.tlb.is_some() && paging::needs_invalidate(pte, npte);

        let end = cmp::min(
            loc.addr + (*pages * PTE_SIZE) as goff,
            math::round_up(loc.addr + PTE_SIZE as goff, cfg::PAGE_SIZE as goff),
        );
        let count = ((end - loc.addr) / PTE_SIZE as goff) as usize;
        assert!(count > 0);

        // with invalidations, every entry is written and invalidated before the next one
        let chunk_len = if invalidate { 1 } else { cfg::KTCU_BUF_SIZE / PTE_SIZE };
        let mut addr = loc.addr;
        let mut left = count;
        while left > 0 {
            let amount = cmp::min(left, chunk_len);
            let mut chunk = Vec::with_capacity(amount);
            for _ in 0..amount {
                klog!(
                    PTES,
                    "{:?}: lvl 0 pte for {:#x}: {:#x}{}",
                    loc.target,
                    *virt + (chunk.len() * cfg::PAGE_SIZE) as goff,
                    npte,
                    if invalidate { " (invalidating)" } else { "" }
                );
                chunk.push(npte);
                npte += cfg::PAGE_SIZE as PTE;
            }
            self.ktcu.write_words(loc.target, addr, &chunk)?;

            for _ in 0..amount {
                if invalidate {
                    self.invalidate_tlb_entry(*virt)?;
                }
                *virt += cfg::PAGE_SIZE as goff;
            }

            addr += (amount * PTE_SIZE) as goff;
            left -= amount;
        }

        *pages -= count;
        *phys += (count * cfg::PAGE_SIZE) as goff;
        Ok(false)
    }

    fn invalidate_tlb_entry(&self, virt: goff) -> Result<(), Error> {
        match self.tlb {
            Some(tile) => self.ktcu.invalidate_page_remote(tile, virt),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base::boxed::Box;
    use base::tcu::{ExtReg, PEId, TCU};

    use crate::arch::Fabric;
    use crate::mem::MemMod;

    const MEM_PE: PEId = 3;

    fn setup() -> (Fabric, KTcu, RefCell<MainMemory>) {
        let fabric = Fabric::new(0);
        fabric.add_tile(1, true);
        fabric.add_tile(MEM_PE, false);
        let ktcu = KTcu::new(Box::new(fabric.clone()));
        let mut mem = MainMemory::new();
        mem.add(MemMod::new(MemType::Kernel, MEM_PE, 0, 0x10_0000));
        (fabric, ktcu, RefCell::new(mem))
    }

    fn root(mem: &RefCell<MainMemory>) -> GlobAddr {
        mem.borrow_mut()
            .allocate(MemType::Kernel, cfg::PAGE_SIZE as goff, cfg::PAGE_SIZE as goff)
            .unwrap()
            .global()
    }

    #[test]
    fn live_locations_use_recursive_entry() {
        let (_fabric, ktcu, mem) = setup();
        let target = TileAddr::new(1, 5);
        let walker = PageTableWalker::new(&ktcu, &mem, WalkMode::Live(target), Some(target));

        for level in 0..LEVEL_CNT {
            let loc = walker.locate_entry(0x1234_5000, level).unwrap();
            assert_eq!(loc.target, target);
            assert_eq!(
                loc.addr,
                paging::recursive_entry_address(LEVEL_CNT, PTE_REC_IDX, 0x1234_5000, level)
            );
        }
    }

    #[test]
    fn parked_walk_needs_tables() {
        let (fabric, ktcu, mem) = setup();
        let root = root(&mem);
        let walker = PageTableWalker::new(&ktcu, &mem, WalkMode::Parked { root }, None);

        let top = LEVEL_CNT - 1;
        let loc = walker.locate_entry(0x4000, top).unwrap();
        assert_eq!(loc.target, TileAddr::tile(MEM_PE));
        assert_eq!(
            loc.addr,
            root.offset() + (paging::pte_index(0x4000, top) * PTE_SIZE) as goff
        );

        // the next level does not exist yet
        assert_eq!(
            walker.locate_entry(0x4000, top - 1).err(),
            Some(Error::new(Code::InvArgs))
        );

        let pte = walker.read(loc).unwrap();
        assert!(!walker.create_missing_table(loc, pte, top, Perm::R).unwrap());
        let table = paging::pte_addr(fabric.read_word(MEM_PE, loc.addr));
        let loc = walker.locate_entry(0x4000, top - 1).unwrap();
        assert_eq!(
            loc.addr,
            GlobAddr::new(table).offset() + (paging::pte_index(0x4000, top - 1) * PTE_SIZE) as goff
        );
    }

    #[test]
    fn absent_table_and_no_permissions() {
        let (_fabric, ktcu, mem) = setup();
        let root = root(&mem);
        let walker = PageTableWalker::new(&ktcu, &mem, WalkMode::Parked { root }, None);
        let avail = mem.borrow().available();

        let loc = walker.locate_entry(0, LEVEL_CNT - 1).unwrap();
        assert!(walker
            .create_missing_table(loc, 0, LEVEL_CNT - 1, Perm::empty())
            .unwrap());
        // nothing has been allocated
        assert_eq!(mem.borrow().available(), avail);
    }

    #[test]
    fn leaf_run_stops_at_table_end() {
        let (fabric, ktcu, mem) = setup();
        let table = root(&mem);
        let loc = EntryLoc {
            target: TileAddr::tile(MEM_PE),
            addr: table.offset() + (510 * PTE_SIZE) as goff,
        };
        let walker = PageTableWalker::new(&ktcu, &mem, WalkMode::Parked { root: table }, None);

        let (mut virt, mut phys, mut pages) = (0x1FE000, 0x8000, 4);
        assert!(!walker
            .materialize_leaf_entries(loc, 0, &mut virt, &mut phys, &mut pages, Perm::RW)
            .unwrap());
        assert_eq!(pages, 2);
        assert_eq!(virt, 0x200000);
        assert_eq!(phys, 0xA000);
        assert_eq!(
            fabric.read_word(MEM_PE, loc.addr + PTE_SIZE as goff),
            paging::build_leaf(0x9000, PTEFlags::R | PTEFlags::W)
        );

        // the same value again is recognized
        let pte = fabric.read_word(MEM_PE, loc.addr);
        let (mut virt, mut phys, mut pages) = (0x1FE000, 0x8000, 4);
        assert!(walker
            .materialize_leaf_entries(loc, pte, &mut virt, &mut phys, &mut pages, Perm::RW)
            .unwrap());
        assert_eq!(pages, 4);
    }

    fn leaf_writes(fabric: &Fabric) -> Vec<(PEId, goff)> {
        fabric
            .accesses()
            .iter()
            .filter(|a| a.write)
            .map(|a| (a.pe, a.addr))
            .collect()
    }

    #[test]
    fn invalidations_follow_each_entry() {
        let (fabric, ktcu, mem) = setup();
        let table = root(&mem);
        for i in 0..3 {
            let pte = paging::build_leaf(0x8000 + i * 0x1000, PTEFlags::R | PTEFlags::W);
            fabric.write_word(MEM_PE, table.offset() + i * PTE_SIZE as goff, pte);
        }

        let tlb = TileAddr::tile(1);
        let mode = WalkMode::Parked { root: table };
        let walker = PageTableWalker::new(&ktcu, &mem, mode, Some(tlb));
        let loc = EntryLoc {
            target: TileAddr::tile(MEM_PE),
            addr: table.offset(),
        };
        let pte = walker.read(loc).unwrap();

        fabric.clear_accesses();
        let (mut virt, mut phys, mut pages) = (0x40_0000, 0x8000, 3);
        walker
            .materialize_leaf_entries(loc, pte, &mut virt, &mut phys, &mut pages, Perm::R)
            .unwrap();

        let cmd = TCU::ext_reg_addr(ExtReg::ExtCmd);
        let expected = (0..3)
            .flat_map(|i| [(MEM_PE, table.offset() + i * PTE_SIZE as goff), (1, cmd)])
            .collect::<Vec<_>>();
        assert_eq!(leaf_writes(&fabric), expected);
        assert_eq!(fabric.inv_pages(1), vec![0x40_0000, 0x40_1000, 0x40_2000]);
    }

    #[test]
    fn fresh_entries_are_written_at_once() {
        let (fabric, ktcu, mem) = setup();
        let table = root(&mem);
        let tlb = TileAddr::tile(1);
        let mode = WalkMode::Parked { root: table };
        let walker = PageTableWalker::new(&ktcu, &mem, mode, Some(tlb));
        let loc = EntryLoc {
            target: TileAddr::tile(MEM_PE),
            addr: table.offset(),
        };

        fabric.clear_accesses();
        let (mut virt, mut phys, mut pages) = (0x40_0000, 0x8000, 3);
        walker
            .materialize_leaf_entries(loc, 0, &mut virt, &mut phys, &mut pages, Perm::RW)
            .unwrap();

        assert_eq!(leaf_writes(&fabric), vec![(MEM_PE, table.offset())]);
        assert!(fabric.inv_pages(1).is_empty());
    }
}
