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
use base::col::{BitVec, Vec};
use base::errors::{Code, Error};
use base::goff;
use base::kif::{self, pemux, Perm};
use base::mem::GlobAddr;
use base::rc::Rc;
use base::serialize::{self, Serialize};
use base::tcu::{self, EpId, Label, Message, PEId, VPEId};

use core::fmt;

use thread::Event;

use crate::cap::{MGateObject, RGateObject, SGateObject};
use crate::com::SendQueue;
use crate::epcfg::EpConfig;
use crate::ktcu::KPEX_EP;
use crate::pes::State;
use crate::Kernel;

/// The kernel's view of a tile: its EPs, its VPE and the multiplexer running on it
pub struct PEMux {
    pe: PEId,
    vpes: Vec<VPEId>,
    eps: BitVec,
    // the receive buffers of the multiplexer at the start of the receive buffer space
    pemux_rbufs: goff,
    rbufs_size: goff,
    mem_base: goff,
    queue: Rc<RefCell<SendQueue>>,
}

impl PEMux {
    pub fn new(pe: PEId, queue: Rc<RefCell<SendQueue>>) -> Self {
        let mut pemux = PEMux {
            pe,
            vpes: Vec::new(),
            eps: BitVec::new(tcu::EP_COUNT as usize),
            pemux_rbufs: 0,
            rbufs_size: 0,
            mem_base: 0,
            queue,
        };

        for ep in 0..tcu::FIRST_USER_EP {
            pemux.eps.set(ep as usize);
        }

        pemux
    }

    /// Configures the EPs for the communication between kernel and multiplexer, if the tile runs
    /// a multiplexer
    pub fn init(&mut self, kern: &Kernel) -> Result<(), Error> {
        if !kern.platform().pe_desc(self.pe).supports_pemux() {
            return Ok(());
        }

        let epcfg = kern.epcfg();

        // configure send EP
        epcfg.configure(self.pe, tcu::KPEX_SEP, &EpConfig::Send {
            vpe: pemux::VPE_ID,
            label: self.pe as Label,
            pe: kern.platform().kernel_pe(),
            ep: KPEX_EP,
            msg_order: cfg::KPEX_RBUF_ORD,
            credits: 1,
        })?;

        // configure receive EP
        let mut rbuf = kern.platform().rbuf_pemux(self.pe);
        epcfg.configure(self.pe, tcu::KPEX_REP, &EpConfig::Receive {
            vpe: pemux::VPE_ID,
            buf: rbuf,
            order: cfg::KPEX_RBUF_ORD,
            msg_order: cfg::KPEX_RBUF_ORD,
            reply_eps: None,
        })?;
        rbuf += cfg::KPEX_RBUF_SIZE;

        // configure upcall EP
        epcfg.configure(self.pe, tcu::PEXUP_REP, &EpConfig::Receive {
            vpe: pemux::VPE_ID,
            buf: rbuf,
            order: cfg::PEXUP_RBUF_ORD,
            msg_order: cfg::PEXUP_RBUF_ORD,
            reply_eps: Some(tcu::PEXUP_RPLEP),
        })?;

        self.pemux_rbufs = cfg::KPEX_RBUF_SIZE + cfg::PEXUP_RBUF_SIZE;
        Ok(())
    }

    pub fn pe_id(&self) -> PEId {
        self.pe
    }

    pub fn has_vpes(&self) -> bool {
        !self.vpes.is_empty()
    }

    pub fn vpes(&self) -> &[VPEId] {
        &self.vpes
    }

    pub fn add_vpe(&mut self, vpe: VPEId) {
        assert!(
            self.vpes.is_empty(),
            "PEMux[{}]: cannot add VPE{}; VPE{} is still resident",
            self.pe,
            vpe,
            self.vpes[0]
        );
        klog!(PEMUX, "PEMux[{}] adding VPE{}", self.pe, vpe);
        self.vpes.push(vpe);
    }

    pub fn remove_vpe(&mut self, vpe: VPEId) {
        assert!(self.vpes.contains(&vpe));
        klog!(PEMUX, "PEMux[{}] removing VPE{}", self.pe, vpe);
        self.vpes.retain(|id| *id != vpe);
        self.rbufs_size = 0;
        self.mem_base = 0;
    }

    pub fn rbufs_size(&self) -> goff {
        self.rbufs_size
    }

    pub fn mem_base(&self) -> goff {
        self.mem_base
    }

    pub fn set_mem_base(&mut self, addr: goff) {
        self.mem_base = addr;
    }

    /// The address that receive buffer addresses are relative to
    pub fn rbuf_base(&self) -> goff {
        self.mem_base
    }

    /// Reserves `size` bytes of the receive buffer space for the resident VPE
    ///
    /// Returns the address of the reserved area. Receive gates can afterwards only be placed
    /// behind all reserved areas.
    pub fn reserve_rbufs(&mut self, kern: &Kernel, size: goff) -> Result<goff, Error> {
        let region = kern
            .platform()
            .def_recvbuf(self.pe)
            .ok_or_else(|| Error::new(Code::NotSup))?;

        let start = region.start + self.pemux_rbufs + self.rbufs_size;
        match start.checked_add(size) {
            Some(end) if end <= region.end => {
                self.rbufs_size += size;
                Ok(start)
            },
            _ => Err(Error::new(Code::NoSpace)),
        }
    }

    /// Returns the first of `count` contiguous free EPs, if there are any
    pub fn find_eps(&self, count: u32) -> Option<EpId> {
        let mut start = self.eps.first_clear();
        let mut bit = start;
        while bit < start + count as usize && bit < tcu::EP_COUNT as usize {
            if self.eps.is_set(bit) {
                start = bit + 1;
            }
            bit += 1;
        }

        match bit == start + count as usize {
            true => Some(start as EpId),
            false => None,
        }
    }

    pub fn eps_free(&self, start: EpId, count: u32) -> bool {
        (start..start + count as EpId).all(|ep| !self.eps.is_set(ep as usize))
    }

    pub fn alloc_eps(&mut self, start: EpId, count: u32) {
        klog!(
            EPS,
            "PEMux[{}] allocating EPs {}..{}",
            self.pe,
            start,
            start as u32 + count - 1
        );
        for bit in start..start + count as EpId {
            assert!(!self.eps.is_set(bit as usize), "EP{} is already allocated", bit);
            self.eps.set(bit as usize);
        }
    }

    pub fn free_eps(&mut self, start: EpId, count: u32) {
        klog!(
            EPS,
            "PEMux[{}] freeing EPs {}..{}",
            self.pe,
            start,
            start as u32 + count - 1
        );
        for bit in start..start + count as EpId {
            assert!(self.eps.is_set(bit as usize), "EP{} is not allocated", bit);
            self.eps.clear(bit as usize);
        }
    }

    pub fn config_snd_ep(
        &mut self,
        kern: &Kernel,
        ep: EpId,
        vpe: VPEId,
        obj: &SGateObject,
    ) -> Result<(), Error> {
        kern.epcfg().configure_send(self.pe, ep, vpe, obj)
    }

    /// Installs `obj` into `ep` with its buffer at `addr`, relative to [`rbuf_base`](Self::rbuf_base)
    ///
    /// The buffer has to be within the receive buffer space of the tile and behind the areas
    /// that have been reserved so far.
    pub fn config_rcv_ep(
        &mut self,
        kern: &Kernel,
        ep: EpId,
        vpe: VPEId,
        reply_eps: Option<EpId>,
        obj: &RGateObject,
        addr: goff,
    ) -> Result<(), Error> {
        if let Some(region) = kern.platform().def_recvbuf(self.pe) {
            let end = addr
                .checked_add(obj.size() as goff)
                .ok_or_else(|| Error::new(Code::InvArgs))?;
            if addr < region.start || end > region.end {
                return Err(Error::new(Code::InvArgs));
            }
            if addr < region.start + self.pemux_rbufs + self.rbufs_size {
                return Err(Error::new(Code::InvArgs));
            }
        }

        let buf = self.rbuf_base() + addr;
        kern.epcfg()
            .configure_receive(self.pe, ep, vpe, obj, buf, reply_eps)
    }

    pub fn config_mem_ep(
        &mut self,
        kern: &Kernel,
        ep: EpId,
        vpe: VPEId,
        obj: &MGateObject,
        off: goff,
    ) -> Result<(), Error> {
        kern.epcfg().configure_memory(self.pe, ep, vpe, obj, off)
    }

    /// Invalidates `ep` and lets the multiplexer drop the unread messages, if there are any
    pub fn invalidate_ep(
        &mut self,
        kern: &Kernel,
        vpe: VPEId,
        ep: EpId,
        force: bool,
    ) -> Result<(), Error> {
        klog!(EPS, "PE{}:EP{} = invalid", self.pe, ep);

        let unread = kern.ktcu().invalidate_ep_remote(self.pe, ep, force)?;
        if unread == 0 {
            return Ok(());
        }

        let req = pemux::RemMsgs {
            op: pemux::Upcalls::RemMsgs,
            vpe_sel: vpe,
            unread_mask: unread,
        };
        match self.upcall(kern, Some(vpe), &req) {
            // without the VPE, nobody will read the messages anyway
            Err(e) if e.code() == Code::VPEGone => Ok(()),
            res => res.map(|_| ()),
        }
    }

    /// Invalidates the reply EPs at `recv_pe` that would send replies to our `send_ep`
    pub fn invalidate_reply_eps(
        &self,
        kern: &Kernel,
        recv_pe: PEId,
        recv_ep: EpId,
        send_ep: EpId,
    ) -> Result<(), Error> {
        klog!(
            EPS,
            "PE{}:EP{} = invalid reply EPs at PE{}:EP{}",
            self.pe,
            send_ep,
            recv_pe,
            recv_ep
        );

        kern.ktcu()
            .inv_reply_remote(recv_pe, recv_ep, self.pe, send_ep)
    }

    /// Handles a call from the multiplexer and replies to it
    pub fn handle_call(&mut self, kern: &Kernel, msg: &Message) -> Result<(), Error> {
        let error = match serialize::from_words::<pemux::Exit>(&msg.data) {
            Ok(req) => {
                klog!(PEMUX, "PEMux[{}] received {:?}", self.pe, req);

                if self.vpes.contains(&req.vpe_sel) {
                    kern.vpes().stop_app(req.vpe_sel, req.code);
                }
                Code::Success
            },
            Err(e) => {
                klog!(ERR, "PEMux[{}] received invalid call: {:?}", self.pe, e);
                e.code()
            },
        };

        let reply = serialize::to_words(&kif::DefaultReply { error })?;
        kern.ktcu().reply(KPEX_EP, msg, &reply)
    }

    pub fn vpe_ctrl(
        &mut self,
        kern: &Kernel,
        vpe: VPEId,
        eps_start: EpId,
        ctrl: pemux::VPEOp,
    ) -> Result<(), Error> {
        let req = pemux::VPECtrl {
            op: pemux::Upcalls::VPECtrl,
            vpe_sel: vpe,
            vpe_op: ctrl,
            eps_start,
        };
        self.upcall(kern, None, &req).map(|_| ())
    }

    pub fn map(
        &mut self,
        kern: &Kernel,
        vpe: VPEId,
        virt: goff,
        global: GlobAddr,
        pages: usize,
        perm: Perm,
    ) -> Result<(), Error> {
        let req = pemux::Map {
            op: pemux::Upcalls::Map,
            vpe_sel: vpe,
            virt,
            global,
            pages,
            perm,
        };
        self.upcall(kern, Some(vpe), &req).map(|_| ())
    }

    pub fn unmap(
        &mut self,
        kern: &Kernel,
        vpe: VPEId,
        virt: goff,
        pages: usize,
    ) -> Result<(), Error> {
        self.map(kern, vpe, virt, GlobAddr::new(0), pages, Perm::empty())
    }

    /// Asks the multiplexer for the global address `virt` of `vpe` is mapped to
    pub fn translate(
        &mut self,
        kern: &Kernel,
        vpe: VPEId,
        virt: goff,
        perm: Perm,
    ) -> Result<GlobAddr, Error> {
        let req = pemux::Translate {
            op: pemux::Upcalls::Translate,
            vpe_sel: vpe,
            virt,
            perm,
        };
        self.upcall(kern, Some(vpe), &req)
            .map(|reply| GlobAddr::new(reply.val & !(cfg::PAGE_MASK as goff)))
    }

    /// Tells the multiplexer that `ep` has been invalidated, without waiting for the reply
    pub fn notify_invalidate(&mut self, kern: &Kernel, vpe: VPEId, ep: EpId) -> Result<(), Error> {
        let req = pemux::EpInval {
            op: pemux::Upcalls::EpInval,
            vpe_sel: vpe,
            ep,
        };
        self.send_upcall(kern, Some(vpe), &req).map(|_| ())
    }

    fn upcall<R: Serialize + fmt::Debug>(
        &mut self,
        kern: &Kernel,
        vpe: Option<VPEId>,
        req: &R,
    ) -> Result<pemux::Response, Error> {
        let event = self.send_upcall(kern, vpe, req)?;

        let msg = match kern.wait_for(event) {
            Ok(Some(msg)) => msg,
            // the queue has been aborted
            Ok(None) => return Err(Error::new(Code::RecvGone)),
            Err(e) if e.code() == Code::Timeout => {
                panic!("PEMux[{}] got no reply for {:?}", self.pe, req)
            },
            Err(e) => return Err(e),
        };

        let reply = serialize::from_words::<pemux::Response>(&msg.data)?;
        klog!(UPCALLS, "PEMux[{}] got {:?}", self.pe, reply);

        Result::<(), Error>::from(reply.error)?;
        Ok(reply)
    }

    fn send_upcall<R: Serialize + fmt::Debug>(
        &mut self,
        kern: &Kernel,
        vpe: Option<VPEId>,
        req: &R,
    ) -> Result<Event, Error> {
        // if the VPE has no app anymore, don't send the upcall
        if let Some(id) = vpe {
            if !kern
                .vpes()
                .vpe(id)
                .map(|v| v.state != State::Dead)
                .unwrap_or(false)
            {
                return Err(Error::new(Code::VPEGone));
            }
        }

        klog!(UPCALLS, "PEMux[{}] sending {:?}", self.pe, req);

        let msg = serialize::to_words(req)?;
        self.queue
            .borrow_mut()
            .send(kern.ktcu(), tcu::PEXUP_REP, 0, &msg)
    }
}

impl fmt::Debug for PEMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PEMux[pe={}, vpes={:?}, rbufs={:#x}, mem_base={:#x}]",
            self.pe, self.vpes, self.rbufs_size, self.mem_base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use thread::ThreadManager;

    fn pemux() -> PEMux {
        let threads = Rc::new(RefCell::new(ThreadManager::new()));
        PEMux::new(1, Rc::new(RefCell::new(SendQueue::new(1, threads))))
    }

    #[test]
    fn ep_allocation() {
        let mut pm = pemux();
        let first = tcu::FIRST_USER_EP;
        assert_eq!(pm.find_eps(4), Some(first));

        pm.alloc_eps(first, 2);
        pm.alloc_eps(first + 3, 1);
        assert!(!pm.eps_free(first, 1));
        assert!(pm.eps_free(first + 2, 1));
        // the gap of one EP is too small
        assert_eq!(pm.find_eps(2), Some(first + 4));
        assert_eq!(pm.find_eps(1), Some(first + 2));

        pm.free_eps(first, 2);
        assert_eq!(pm.find_eps(3), Some(first));
        assert_eq!(pm.find_eps(tcu::EP_COUNT as u32), None);
    }

    #[test]
    #[should_panic]
    fn double_free() {
        let mut pm = pemux();
        pm.alloc_eps(tcu::FIRST_USER_EP, 1);
        pm.free_eps(tcu::FIRST_USER_EP, 1);
        pm.free_eps(tcu::FIRST_USER_EP, 1);
    }

    #[test]
    #[should_panic]
    fn double_alloc() {
        let mut pm = pemux();
        pm.alloc_eps(tcu::FIRST_USER_EP, 2);
        pm.alloc_eps(tcu::FIRST_USER_EP + 1, 1);
    }

    #[test]
    #[should_panic]
    fn second_vpe() {
        let mut pm = pemux();
        pm.add_vpe(1);
        pm.add_vpe(2);
    }

    #[test]
    fn vpe_residency() {
        let mut pm = pemux();
        pm.add_vpe(1);
        pm.set_mem_base(0x10_0000);
        assert_eq!(pm.rbuf_base(), 0x10_0000);

        pm.remove_vpe(1);
        assert!(!pm.has_vpes());
        assert_eq!(pm.mem_base(), 0);
        assert_eq!(pm.rbufs_size(), 0);
        pm.add_vpe(2);
        assert_eq!(pm.vpes(), &[2]);
    }
}
