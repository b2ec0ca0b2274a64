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
use base::col::BTreeMap;
use base::mem::GlobAddr;
use base::tcu::{EpId, PEId, VPEId};

use crate::pes::State;

/// What the kernel needs to know about a VPE
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VPEInfo {
    pub id: VPEId,
    pub pe: PEId,
    pub state: State,
    /// The root page table, if the VPE has an address space
    pub root_pt: Option<GlobAddr>,
    pub eps_start: EpId,
}

/// The VPE lookups and lifecycle operations the PE and address-space management depends on
pub trait VPERegistry {
    /// Returns the VPE with given id, if it exists
    fn vpe(&self, id: VPEId) -> Option<VPEInfo>;

    /// Stops the application of the given VPE because it exited with `exit_code`
    fn stop_app(&self, id: VPEId, exit_code: i32);
}

/// A simple VPE registry
#[derive(Default)]
pub struct VPEMng {
    vpes: RefCell<BTreeMap<VPEId, VPEInfo>>,
    exits: RefCell<BTreeMap<VPEId, i32>>,
}

impl VPEMng {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.vpes.borrow().len()
    }

    pub fn add(&self, vpe: VPEInfo) {
        self.vpes.borrow_mut().insert(vpe.id, vpe);
    }

    pub fn remove(&self, id: VPEId) -> Option<VPEInfo> {
        self.vpes.borrow_mut().remove(&id)
    }

    pub fn set_state(&self, id: VPEId, state: State) {
        if let Some(v) = self.vpes.borrow_mut().get_mut(&id) {
            v.state = state;
        }
    }

    /// Returns the exit code of the given VPE, if it has exited
    pub fn exit_code(&self, id: VPEId) -> Option<i32> {
        self.exits.borrow().get(&id).copied()
    }
}

impl VPERegistry for VPEMng {
    fn vpe(&self, id: VPEId) -> Option<VPEInfo> {
        self.vpes.borrow().get(&id).copied()
    }

    fn stop_app(&self, id: VPEId, exit_code: i32) {
        klog!(PEMUX, "VPE{} exited with {}", id, exit_code);
        self.set_state(id, State::Dead);
        self.exits.borrow_mut().insert(id, exit_code);
    }
}
