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

//! Builds the register images of EPs and installs them on remote tiles

use base::cell::RefCell;
use base::errors::{Code, Error};
use base::goff;
use base::kif::Perm;
use base::tcu::{EpId, Label, PEId, Reg, VPEId, TCU};

use thread::ThreadManager;

use crate::cap::{MGateObject, RGateObject, SGateObject};
use crate::ktcu::KTcu;
use crate::pes::INVAL_ID;
use crate::platform::Platform;

/// The configuration of an EP
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EpConfig {
    Invalid,
    Send {
        vpe: VPEId,
        label: Label,
        pe: PEId,
        ep: EpId,
        msg_order: u32,
        credits: u32,
    },
    Receive {
        vpe: VPEId,
        buf: goff,
        order: u32,
        msg_order: u32,
        reply_eps: Option<EpId>,
    },
    Memory {
        vpe: VPEId,
        pe: PEId,
        tgt_vpe: VPEId,
        addr: goff,
        size: goff,
        perm: Perm,
    },
}

impl EpConfig {
    /// Writes the register image of this configuration into `regs`
    pub fn encode(&self, regs: &mut [Reg]) {
        match *self {
            EpConfig::Invalid => regs.fill(0),
            EpConfig::Send {
                vpe,
                label,
                pe,
                ep,
                msg_order,
                credits,
            } => TCU::config_send(regs, vpe, label, pe, ep, msg_order, credits),
            EpConfig::Receive {
                vpe,
                buf,
                order,
                msg_order,
                reply_eps,
            } => TCU::config_recv(regs, vpe, buf, order, msg_order, reply_eps),
            EpConfig::Memory {
                vpe,
                pe,
                tgt_vpe,
                addr,
                size,
                perm,
            } => TCU::config_mem(regs, vpe, pe, tgt_vpe, addr, size as usize, perm),
        }
    }
}

/// Installs EP configurations on remote tiles
pub struct EpConfigurator<'k> {
    ktcu: &'k KTcu,
    platform: &'k dyn Platform,
    threads: &'k RefCell<ThreadManager>,
}

impl<'k> EpConfigurator<'k> {
    pub fn new(
        ktcu: &'k KTcu,
        platform: &'k dyn Platform,
        threads: &'k RefCell<ThreadManager>,
    ) -> Self {
        EpConfigurator {
            ktcu,
            platform,
            threads,
        }
    }

    /// Returns the VPE id that is written into EPs on `pe` that belong to `vpe`
    ///
    /// Only shared tiles distinguish between VPEs; all others use [`INVAL_ID`].
    pub fn owner(&self, pe: PEId, vpe: VPEId) -> VPEId {
        match self.platform.is_shared(pe) {
            true => vpe,
            false => INVAL_ID,
        }
    }

    /// Writes the register image for `cfg` into `ep` on `pe`
    pub fn configure(&self, pe: PEId, ep: EpId, cfg: &EpConfig) -> Result<(), Error> {
        klog!(EPS, "PE{}:EP{} = {:?}", pe, ep, cfg);

        self.ktcu.config_remote_ep(pe, ep, |regs| cfg.encode(regs))
    }

    /// Installs `rgate` with its buffer at `buf` into `ep` on `pe` and wakes up all threads
    /// that wait for the gate
    pub fn configure_receive(
        &self,
        pe: PEId,
        ep: EpId,
        vpe: VPEId,
        rgate: &RGateObject,
        buf: goff,
        reply_eps: Option<EpId>,
    ) -> Result<(), Error> {
        self.configure(pe, ep, &EpConfig::Receive {
            vpe: self.owner(pe, vpe),
            buf,
            order: rgate.order(),
            msg_order: rgate.msg_order(),
            reply_eps,
        })?;

        rgate.activate(pe, ep, buf);
        self.threads.borrow_mut().notify(rgate.get_event(), None);
        Ok(())
    }

    /// Installs `sgate` into `ep` on `pe`
    ///
    /// Fails with [`Code::Exists`] if the gate is already installed in an EP and with
    /// [`Code::InvArgs`] if its receive gate is not installed yet.
    pub fn configure_send(
        &self,
        pe: PEId,
        ep: EpId,
        vpe: VPEId,
        sgate: &SGateObject,
    ) -> Result<(), Error> {
        if sgate.activated() {
            return Err(Error::new(Code::Exists));
        }

        let rgate = sgate.rgate();
        let (rpe, rep) = rgate.location().ok_or_else(|| Error::new(Code::InvArgs))?;

        self.configure(pe, ep, &EpConfig::Send {
            vpe: self.owner(pe, vpe),
            label: sgate.label(),
            pe: rpe,
            ep: rep,
            msg_order: rgate.msg_order(),
            credits: sgate.credits(),
        })?;

        sgate.set_activated(true);
        Ok(())
    }

    /// Installs the region of `mgate` that starts at `off` into `ep` on `pe`
    pub fn configure_memory(
        &self,
        pe: PEId,
        ep: EpId,
        vpe: VPEId,
        mgate: &MGateObject,
        off: goff,
    ) -> Result<(), Error> {
        if off >= mgate.size() {
            return Err(Error::new(Code::InvArgs));
        }
        let addr = mgate
            .addr()
            .checked_add(off)
            .ok_or_else(|| Error::new(Code::InvArgs))?;

        self.configure(pe, ep, &EpConfig::Memory {
            vpe: self.owner(pe, vpe),
            pe: mgate.pe_id(),
            tgt_vpe: mgate.vpe(),
            addr,
            size: mgate.size() - off,
            perm: mgate.perms(),
        })
    }
}
