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

mod common;

use base::errors::{Code, Error};
use base::kif::Perm;
use base::mem::GlobAddr;
use base::tcu::{ExtReg, FeatureFlags, INVALID_EP, INVALID_VPE, TCU};

use paging::{PTEFlags, LEVEL_CNT, PTE, PTE_REC_IDX, PTE_SIZE};

use pekernel::pes::State;

use common::*;

const VIRT: u64 = 0x10_0000;

#[test]
fn init_installs_address_space() {
    let env = setup(None);
    let root = env.add_vpe(5, VM_PE, State::Parked);
    // garbage from a previous user
    env.fabric.write_word(root.pe(), root.offset() + 8, 0xDEAD);

    env.kern.aspace().init_aspace(5, Some(12)).unwrap();

    assert_eq!(env.fabric.read_word(root.pe(), root.offset() + 8), 0);
    let rec = env
        .fabric
        .read_word(root.pe(), root.offset() + (PTE_REC_IDX * PTE_SIZE) as u64);
    assert_eq!(rec, paging::build_table(root.raw()));

    assert_eq!(env.fabric.ext_reg(VM_PE, ExtReg::RootPT), root.raw());
    assert_eq!(env.fabric.ext_reg(VM_PE, ExtReg::PFEp), 12);
    assert_eq!(
        env.fabric.ext_reg(VM_PE, ExtReg::Features),
        FeatureFlags::VM.bits()
    );
    assert_eq!(env.fabric.tlb_flushes(VM_PE), 1);
}

#[test]
fn init_without_pagefault_ep() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    env.kern.aspace().init_aspace(5, None).unwrap();
    assert_eq!(env.fabric.ext_reg(VM_PE, ExtReg::PFEp), INVALID_EP as u64);
}

#[test]
fn map_parked() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(2);
    aspace.map(5, VIRT, pages, 2, Perm::RW).unwrap();

    assert_eq!(env.fabric.translate(VM_PE, VIRT, Perm::RW), Ok(pages));
    assert_eq!(
        env.fabric.translate(VM_PE, VIRT + PAGE, Perm::R),
        Ok(pages + PAGE)
    );
    assert_eq!(
        env.fabric.translate(VM_PE, VIRT + 2 * PAGE, Perm::R),
        Err(Error::new(Code::TranslationFault))
    );
    assert_eq!(
        env.fabric.translate(VM_PE, VIRT, Perm::X),
        Err(Error::new(Code::NoPerm))
    );

    // the tables are only touched in physical memory
    assert!(env.fabric.accesses().iter().all(|a| a.vpe == INVALID_VPE));
}

#[test]
fn map_live() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    env.fabric.clear_accesses();
    let pages = env.user_pages(3);
    aspace.map(5, VIRT, pages, 3, Perm::R).unwrap();

    for i in 0..3 {
        assert_eq!(
            env.fabric.translate(VM_PE, VIRT + i * PAGE, Perm::R),
            Ok(pages + i * PAGE)
        );
    }

    // all entries have been written via the virtual addresses of the VPE
    let writes = env
        .fabric
        .accesses()
        .into_iter()
        .filter(|a| a.write && a.pe == VM_PE)
        .collect::<Vec<_>>();
    assert!(!writes.is_empty());
    assert!(writes.iter().all(|a| a.vpe == 5));
}

/// Walks the tables from `root` and returns the leaf entry for `virt`
fn leaf_entry(env: &Env, root: GlobAddr, virt: u64) -> PTE {
    let mut table = root;
    for level in (1..LEVEL_CNT).rev() {
        let idx = paging::pte_index(virt, level) as u64;
        let pte = env.fabric.read_word(table.pe(), table.offset() + idx * PTE_SIZE as u64);
        table = GlobAddr::new(paging::pte_addr(pte));
    }
    let idx = paging::pte_index(virt, 0) as u64;
    env.fabric.read_word(table.pe(), table.offset() + idx * PTE_SIZE as u64)
}

#[test]
fn fresh_mapping_allocates_one_table_per_level() {
    let env = setup(None);
    let root = env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(3);
    let avail = env.kern.mem().borrow().available();
    aspace.map(5, VIRT, pages, 3, Perm::RW).unwrap();

    assert_eq!(
        avail - env.kern.mem().borrow().available(),
        (LEVEL_CNT as u64 - 1) * PAGE
    );
    for i in 0..3 {
        let pte = leaf_entry(&env, root, VIRT + i * PAGE);
        assert_eq!(
            paging::pte_flags(pte) & PTEFlags::IRWX,
            PTEFlags::I | PTEFlags::R | PTEFlags::W
        );
        assert_eq!(paging::pte_addr(pte), (pages + i * PAGE).raw());
    }
    assert!(env.fabric.inv_pages(VM_PE).is_empty());
}

#[test]
fn mapping_twice_writes_nothing() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(4);
    aspace.map(5, VIRT, pages, 4, Perm::RW).unwrap();
    let avail = env.kern.mem().borrow().available();

    env.fabric.clear_accesses();
    aspace.map(5, VIRT, pages, 4, Perm::RW).unwrap();
    assert_eq!(env.sent_writes(), 0);
    assert_eq!(env.kern.mem().borrow().available(), avail);
    assert!(env.fabric.inv_pages(VM_PE).is_empty());
}

#[test]
fn mapping_across_tables() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    // the last two pages covered by one leaf table and the first one of the next
    let virt = 0x1FE000;
    let pages = env.user_pages(3);
    aspace.map(5, virt, pages, 3, Perm::RWX).unwrap();

    for i in 0..3 {
        assert_eq!(
            env.fabric.translate(VM_PE, virt + i * PAGE, Perm::RWX),
            Ok(pages + i * PAGE)
        );
    }
}

#[test]
fn downgrades_invalidate_tlb() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(3);
    aspace.map(5, VIRT, pages, 3, Perm::RW).unwrap();
    assert!(env.fabric.inv_pages(VM_PE).is_empty());

    aspace.map(5, VIRT, pages, 3, Perm::R).unwrap();
    assert_eq!(
        env.fabric.inv_pages(VM_PE),
        vec![VIRT, VIRT + PAGE, VIRT + 2 * PAGE]
    );
    assert_eq!(
        env.fabric.translate(VM_PE, VIRT, Perm::W),
        Err(Error::new(Code::NoPerm))
    );

    // upgrades don't need an invalidation
    aspace.map(5, VIRT, pages, 3, Perm::RW).unwrap();
    assert_eq!(env.fabric.inv_pages(VM_PE).len(), 3);
}

#[test]
fn remapping_to_other_pages_invalidates_tlb() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let first = env.user_pages(1);
    let second = env.user_pages(1);
    aspace.map(5, VIRT, first, 1, Perm::R).unwrap();
    aspace.map(5, VIRT, second, 1, Perm::R).unwrap();
    assert_eq!(env.fabric.inv_pages(VM_PE), vec![VIRT]);
    assert_eq!(env.fabric.translate(VM_PE, VIRT, Perm::R), Ok(second));
}

#[test]
fn unmap() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(2);
    aspace.map(5, VIRT, pages, 2, Perm::RW).unwrap();
    aspace.unmap(5, VIRT + PAGE, 1).unwrap();

    assert_eq!(env.fabric.translate(VM_PE, VIRT, Perm::R), Ok(pages));
    assert_eq!(
        env.fabric.translate(VM_PE, VIRT + PAGE, Perm::R),
        Err(Error::new(Code::TranslationFault))
    );
    assert_eq!(env.fabric.inv_pages(VM_PE), vec![VIRT + PAGE]);
}

#[test]
fn parked_vpes_need_no_invalidation() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    // another VPE currently owns the tile
    env.fabric.set_vpe(VM_PE, 7);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(3);
    aspace.map(5, VIRT, pages, 3, Perm::RW).unwrap();
    env.fabric.clear_accesses();
    aspace.map(5, VIRT, pages, 3, Perm::R).unwrap();
    aspace.unmap(5, VIRT, 3).unwrap();

    let cmd = TCU::ext_reg_addr(ExtReg::ExtCmd);
    assert!(env
        .fabric
        .accesses()
        .iter()
        .all(|a| !(a.pe == VM_PE && a.addr == cmd)));
    assert!(env.fabric.inv_pages(VM_PE).is_empty());
}

#[test]
fn invalidations_follow_their_entries() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let pages = env.user_pages(3);
    aspace.map(5, VIRT, pages, 3, Perm::RW).unwrap();
    env.fabric.clear_accesses();
    aspace.map(5, VIRT, pages, 3, Perm::R).unwrap();

    // entry, invalidation, entry, invalidation, ...
    let cmd = TCU::ext_reg_addr(ExtReg::ExtCmd);
    let writes = env
        .fabric
        .accesses()
        .into_iter()
        .filter(|a| a.write)
        .map(|a| a.addr == cmd)
        .collect::<Vec<_>>();
    assert_eq!(writes, vec![false, true, false, true, false, true]);
}

#[test]
fn running_vpe_without_virtual_memory() {
    let env = setup(None);
    let root = env.add_vpe(6, SPM_PE, State::Running);
    env.fabric.set_vpe(SPM_PE, 6);
    let aspace = env.kern.aspace();
    aspace.init_aspace(6, None).unwrap();

    env.fabric.clear_accesses();
    let pages = env.user_pages(1);
    aspace.map(6, VIRT, pages, 1, Perm::RW).unwrap();

    // the tables are not reachable via the tile, so that they are walked in memory
    assert!(env.fabric.accesses().iter().all(|a| a.pe != SPM_PE));
    assert_eq!(
        paging::pte_addr(leaf_entry(&env, root, VIRT)),
        pages.raw()
    );
}

#[test]
fn addresses_beyond_address_space() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();
    let pages = env.user_pages(2);

    let end = paging::va_mask(LEVEL_CNT) + 1;
    env.fabric.clear_accesses();
    assert_eq!(
        aspace.map(5, end - PAGE, pages, 2, Perm::RW),
        Err(Error::new(Code::InvArgs))
    );
    assert_eq!(
        aspace.map(5, end, pages, 1, Perm::RW),
        Err(Error::new(Code::InvArgs))
    );
    assert_eq!(
        aspace.unmap(5, u64::MAX & !(PAGE - 1), 2),
        Err(Error::new(Code::InvArgs))
    );
    assert!(env.fabric.accesses().is_empty());

    // the last page is fine
    aspace.map(5, end - PAGE, pages, 1, Perm::RW).unwrap();
}

#[test]
fn empty_ranges_are_ignored() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let pages = env.user_pages(1);

    env.fabric.clear_accesses();
    let aspace = env.kern.aspace();
    aspace.map(5, 0, pages, 0, Perm::RW).unwrap();
    aspace.unmap(5, 0, 0).unwrap();
    assert!(env.fabric.accesses().is_empty());
}

#[test]
fn unmap_without_tables() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();

    let avail = env.kern.mem().borrow().available();
    env.fabric.clear_accesses();
    aspace.unmap(5, 0x4000_0000, 16).unwrap();
    assert_eq!(env.sent_writes(), 0);
    assert_eq!(env.kern.mem().borrow().available(), avail);
}

#[test]
fn dead_vpes_are_ignored() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Dead);
    let pages = env.user_pages(1);

    env.fabric.clear_accesses();
    let aspace = env.kern.aspace();
    aspace.map(5, VIRT, pages, 1, Perm::RW).unwrap();
    aspace.unmap(5, VIRT, 1).unwrap();
    assert!(env.fabric.accesses().is_empty());
}

#[test]
fn unknown_vpe() {
    let env = setup(None);
    assert_eq!(
        env.kern.aspace().unmap(9, VIRT, 1),
        Err(Error::new(Code::VPEGone))
    );
}

#[test]
fn no_invalidation_without_virtual_memory() {
    let env = setup(None);
    env.add_vpe(6, SPM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(6, None).unwrap();
    assert_eq!(env.fabric.ext_reg(SPM_PE, ExtReg::Features), 0);

    let pages = env.user_pages(2);
    aspace.map(6, VIRT, pages, 2, Perm::RW).unwrap();
    aspace.unmap(6, VIRT, 2).unwrap();
    assert!(env.fabric.inv_pages(SPM_PE).is_empty());
}

#[test]
fn switched_out_vpe_is_retried_at_tile() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.fabric.set_vpe(VM_PE, 5);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();
    let pages = env.user_pages(1);
    aspace.map(5, VIRT, pages, 1, Perm::RW).unwrap();

    env.fabric.clear_accesses();
    env.fabric.inject_gone(1);
    aspace.map(5, VIRT, pages, 1, Perm::R).unwrap();

    let accesses = env.fabric.accesses();
    let first = accesses[0];
    assert_eq!(first.vpe, 5);
    // the failed access is repeated with the tile as a whole
    assert_eq!(accesses[1].vpe, INVALID_VPE);
    assert_eq!(accesses[1].addr, first.addr);
}

#[test]
fn table_entries() {
    let env = setup(None);
    let root = env.add_vpe(5, VM_PE, State::Parked);
    let aspace = env.kern.aspace();
    aspace.init_aspace(5, None).unwrap();
    aspace.map(5, VIRT, env.user_pages(1), 1, Perm::R).unwrap();

    let top = paging::LEVEL_CNT - 1;
    let pte = env.fabric.read_word(
        root.pe(),
        root.offset() + (paging::pte_index(VIRT, top) * PTE_SIZE) as u64,
    );
    assert_eq!(paging::pte_flags(pte) & PTEFlags::IRWX, PTEFlags::RWX);
}
