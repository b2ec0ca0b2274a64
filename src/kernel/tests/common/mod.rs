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

#![allow(dead_code)]

use base::boxed::Box;
use base::errors::Code;
use base::goff;
use base::kif::pemux;
use base::mem::GlobAddr;
use base::rc::Rc;
use base::serialize;
use base::tcu::{PEId, VPEId};

use pekernel::arch::Fabric;
use pekernel::args::Args;
use pekernel::mem::MemType;
use pekernel::pes::{State, VPEInfo, VPEMng, VPERegistry};
use pekernel::platform::{PEDesc, PEFlags, PEType, PlatformDesc};
use pekernel::Kernel;

pub const KERNEL_PE: PEId = 0;
/// A shared tile with virtual memory
pub const VM_PE: PEId = 1;
/// A tile with a scratchpad memory
pub const SPM_PE: PEId = 2;
pub const MEM_PE: PEId = 3;

pub const PAGE: goff = 0x1000;

pub struct Env {
    pub fabric: Fabric,
    pub vpes: Rc<VPEMng>,
    pub kern: Kernel,
}

pub fn setup(upcall_timeout: Option<u64>) -> Env {
    let fabric = Fabric::new(KERNEL_PE);
    fabric.add_tile(VM_PE, true);
    fabric.add_tile(SPM_PE, false);
    fabric.add_tile(MEM_PE, false);

    let platform = PlatformDesc::new(KERNEL_PE)
        .add_pe(KERNEL_PE, PEDesc::new(PEType::Comp, 0x10_0000, PEFlags::empty()))
        .add_pe(VM_PE, PEDesc::new(PEType::Comp, 0, PEFlags::VM | PEFlags::PEMUX))
        .add_pe(SPM_PE, PEDesc::new(PEType::Comp, 0x20_0000, PEFlags::PEMUX))
        .add_pe(MEM_PE, PEDesc::new(PEType::Mem, 0x100_0000, PEFlags::empty()))
        .shared(VM_PE);

    let args = Args {
        kmem: 0x10_0000,
        upcall_timeout,
        ..Args::default()
    };

    let vpes = Rc::new(VPEMng::new());
    let kern = Kernel::new(
        args,
        Box::new(fabric.clone()),
        Box::new(platform),
        vpes.clone() as Rc<dyn VPERegistry>,
    )
    .unwrap();

    Env { fabric, vpes, kern }
}

impl Env {
    /// Adds a VPE with a fresh root page table
    pub fn add_vpe(&self, id: VPEId, pe: PEId, state: State) -> GlobAddr {
        let root = self
            .kern
            .mem()
            .borrow_mut()
            .allocate(MemType::Kernel, PAGE, PAGE)
            .unwrap()
            .global();
        self.vpes.add(VPEInfo {
            id,
            pe,
            state,
            root_pt: Some(root),
            eps_start: 16,
        });
        root
    }

    pub fn user_pages(&self, count: goff) -> GlobAddr {
        self.kern
            .mem()
            .borrow_mut()
            .allocate(MemType::User, count * PAGE, PAGE)
            .unwrap()
            .global()
    }

    /// Lets the multiplexer on `pe` answer every upcall with `error` and `val`
    pub fn answer_upcalls(&self, pe: PEId, error: Code, val: u64) {
        self.fabric.set_handler(
            pe,
            Box::new(move |_msg| {
                Some(serialize::to_words(&pemux::Response { error, val }).unwrap())
            }),
        );
    }

    pub fn sent_writes(&self) -> usize {
        self.fabric.accesses().iter().filter(|a| a.write).count()
    }
}
