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

//! Contains the page-table entry format and the address arithmetic of the page tables
//!
//! The page tables are radix trees with `LEVEL_CNT` levels of 512 entries each. Every root table
//! contains a recursive entry at `PTE_REC_IDX` that points to the table itself. If the page tables
//! are active on a tile, this allows to access every page-table entry via a virtual address (see
//! [`recursive_entry_address`]).

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use cfg_if::cfg_if;

use base::cfg;
use base::goff;
use base::kif::Perm;

/// A page table entry, containing a global address and `PTEFlags` in the lower bits
pub type PTE = u64;

pub const PTE_BITS: usize = 3;
pub const PTE_SIZE: usize = 1 << PTE_BITS;

pub const LEVEL_BITS: usize = cfg::PAGE_BITS - PTE_BITS;
pub const LEVEL_MASK: usize = (1 << LEVEL_BITS) - 1;

cfg_if! {
    if #[cfg(feature = "sv39")] {
        pub const LEVEL_CNT: usize = 3;
    }
    else {
        pub const LEVEL_CNT: usize = 4;
    }
}

/// The index of the recursive entry in the root table
pub const PTE_REC_IDX: usize = 0x10;

bitflags! {
    /// The flags of page table entries
    ///
    /// Entries that point to another table have `RWX` set; leaf entries have `I` set in addition
    /// to their permissions.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PTEFlags : PTE {
        const R     = 0b0001;
        const W     = 0b0010;
        const X     = 0b0100;
        const I     = 0b1000;

        const RWX   = Self::R.bits() | Self::W.bits() | Self::X.bits();
        const IRWX  = Self::RWX.bits() | Self::I.bits();
    }
}

impl From<Perm> for PTEFlags {
    fn from(perm: Perm) -> Self {
        PTEFlags::from_bits_truncate(perm.bits() as PTE) & PTEFlags::RWX
    }
}

/// Returns the index into the table at `level` for the virtual address `virt`
pub fn pte_index(virt: goff, level: usize) -> usize {
    (virt >> (cfg::PAGE_BITS + level * LEVEL_BITS)) as usize & LEVEL_MASK
}

/// Returns the address of the page-table entry for `virt` at `level`, when accessed through the
/// recursive entry at index `rec_idx` in a `level_cnt`-level page table.
///
/// The result uses the recursive index for the `level + 1` topmost indices and moves the indices
/// of `virt` down accordingly, so that the hardware walk ends in the table at `level` and the
/// page offset selects the entry.
pub fn recursive_entry_address(level_cnt: usize, rec_idx: usize, virt: goff, level: usize) -> goff {
    assert!(level < level_cnt);

    let mut rec_mask: goff = 0;
    for i in 0..level_cnt {
        rec_mask |= (rec_idx as goff) << (cfg::PAGE_BITS + i * LEVEL_BITS);
    }

    // bits beyond the address space would end up in the recursive indices
    let mut addr = (virt & va_mask(level_cnt)) >> (cfg::PAGE_BITS + level * LEVEL_BITS);
    addr <<= PTE_BITS;

    let rem_mask: goff = (1 << (cfg::PAGE_BITS + LEVEL_BITS * (level_cnt - (level + 1)))) - 1;
    addr | (rec_mask & !rem_mask)
}

/// Returns the mask of the virtual addresses a `level_cnt`-level page table can translate
pub fn va_mask(level_cnt: usize) -> goff {
    (1 << (level_cnt * LEVEL_BITS + cfg::PAGE_BITS)) - 1
}

/// Returns the virtual address range that contains all page-table entries, if accessed
/// through the recursive entry
pub fn pte_area(level_cnt: usize, rec_idx: usize) -> core::ops::Range<goff> {
    let shift = cfg::PAGE_BITS + (level_cnt - 1) * LEVEL_BITS;
    let begin = (rec_idx as goff) << shift;
    begin..begin + (1 << shift)
}

/// Builds a leaf entry that maps `phys` with given permissions
pub fn build_leaf(phys: goff, perm: PTEFlags) -> PTE {
    phys | (perm & PTEFlags::RWX).bits() | PTEFlags::I.bits()
}

/// Builds an entry that points to the table at `phys`
pub fn build_table(phys: goff) -> PTE {
    phys | PTEFlags::RWX.bits()
}

/// Returns the address contained in the given entry
pub fn pte_addr(pte: PTE) -> goff {
    pte & !(cfg::PAGE_MASK as goff)
}

/// Returns the flags of the given entry
pub fn pte_flags(pte: PTE) -> PTEFlags {
    PTEFlags::from_bits_truncate(pte)
}

/// Returns whether replacing `old` by `new` requires to invalidate the TLB entry
///
/// That is the case if a permission is removed or if a present mapping now refers to a different
/// page. Upgrades and fresh mappings do not require an invalidation.
pub fn needs_invalidate(old: PTE, new: PTE) -> bool {
    let old_perm = pte_flags(old) & PTEFlags::RWX;
    let new_perm = pte_flags(new) & PTEFlags::RWX;
    !(old_perm - new_perm).is_empty() || (!old_perm.is_empty() && pte_addr(old) != pte_addr(new))
}
