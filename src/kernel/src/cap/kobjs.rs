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

use base::cell::Cell;
use base::goff;
use base::kif::Perm;
use base::rc::Rc;
use base::tcu::{EpId, Label, PEId, VPEId};

use core::fmt;

use thread::Event;

/// Where a receive gate has been installed
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Installed {
    pe: PEId,
    ep: EpId,
    buf: goff,
}

/// A receive buffer of `2^order` bytes, split into slots of `2^msg_order` bytes
pub struct RGateObject {
    installed: Cell<Option<Installed>>,
    order: u32,
    msg_order: u32,
    // notified once the gate is installed, so that senders can be configured
    event: Event,
}

impl RGateObject {
    pub fn new(order: u32, msg_order: u32, event: Event) -> Rc<Self> {
        Rc::new(Self {
            installed: Cell::new(None),
            order,
            msg_order,
            event,
        })
    }

    /// Returns the PE and EP the gate is installed in
    pub fn location(&self) -> Option<(PEId, EpId)> {
        self.installed.get().map(|i| (i.pe, i.ep))
    }

    /// Returns the buffer address on the owning tile, or 0 if not installed
    pub fn addr(&self) -> goff {
        self.installed.get().map_or(0, |i| i.buf)
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn size(&self) -> usize {
        1 << self.order
    }

    pub fn msg_order(&self) -> u32 {
        self.msg_order
    }

    pub fn activated(&self) -> bool {
        self.installed.get().is_some()
    }

    pub fn activate(&self, pe: PEId, ep: EpId, buf: goff) {
        self.installed.set(Some(Installed { pe, ep, buf }));
    }

    pub fn get_event(&self) -> Event {
        self.event
    }
}

impl fmt::Debug for RGateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.installed.get() {
            Some(i) => write!(f, "RGate[PE{}:EP{} @ {:#x}", i.pe, i.ep, i.buf)?,
            None => write!(f, "RGate[inactive")?,
        }
        write!(f, ", order={}, msg_order={}]", self.order, self.msg_order)
    }
}

/// The right to send to a receive gate, labeled with `label`
pub struct SGateObject {
    rgate: Rc<RGateObject>,
    label: Label,
    credits: u32,
    activated: Cell<bool>,
}

impl SGateObject {
    pub fn new(rgate: &Rc<RGateObject>, label: Label, credits: u32) -> Rc<Self> {
        Rc::new(Self {
            rgate: rgate.clone(),
            label,
            credits,
            activated: Cell::new(false),
        })
    }

    pub fn rgate(&self) -> &RGateObject {
        &self.rgate
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn credits(&self) -> u32 {
        self.credits
    }

    /// Returns whether the gate has been installed in a send EP
    pub fn activated(&self) -> bool {
        self.activated.get()
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.set(activated);
    }
}

impl fmt::Debug for SGateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SGate")
            .field("rgate", &self.rgate)
            .field("label", &self.label)
            .field("credits", &self.credits)
            .field("activated", &self.activated.get())
            .finish()
    }
}

/// Access to `size` bytes at `addr` on tile `pe`
///
/// With a valid `vpe`, `addr` is virtual and the access only succeeds while `vpe` runs on `pe`.
#[derive(Debug)]
pub struct MGateObject {
    pe: PEId,
    vpe: VPEId,
    addr: goff,
    size: goff,
    perms: Perm,
}

impl MGateObject {
    pub fn new(pe: PEId, vpe: VPEId, addr: goff, size: goff, perms: Perm) -> Rc<Self> {
        Rc::new(Self {
            pe,
            vpe,
            addr,
            size,
            perms,
        })
    }

    pub fn pe_id(&self) -> PEId {
        self.pe
    }

    pub fn vpe(&self) -> VPEId {
        self.vpe
    }

    pub fn addr(&self) -> goff {
        self.addr
    }

    pub fn size(&self) -> goff {
        self.size
    }

    pub fn perms(&self) -> Perm {
        self.perms
    }
}
