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

//! The kernel's access to remote tiles via its own TCU
//!
//! All remote reads and writes go through a single scratch memory EP (`KTMP_EP`), which is
//! reconfigured for every transfer. The configuration and the transfer form a critical section
//! (see [`XferGuard`]). Transfers that address a VPE are retried once without the VPE if the VPE
//! is no longer running on the tile.

use base::boxed::Box;
use base::cell::{RefCell, RefMut};
use base::cfg;
use base::col::Vec;
use base::errors::{Code, Error};
use base::goff;
use base::kif::Perm;
use base::mem;
use base::tcu::{
    CmdFlags, EpId, ExtCmdOpCode, ExtReg, Label, Message, PEId, Reg, EP_REGS, PMEM_PROT_EPS, TCU,
    UNLIM_CREDITS,
};
use base::vec;

use core::cmp;

use crate::pes::{TileAddr, INVAL_ID};

/// Receives the calls from the multiplexers
pub const KPEX_EP: EpId = PMEM_PROT_EPS as EpId + 0;
/// Receives the replies to upcalls
pub const KSRV_EP: EpId = PMEM_PROT_EPS as EpId + 1;
/// The scratch EP for remote transfers and messages
pub const KTMP_EP: EpId = PMEM_PROT_EPS as EpId + 2;

/// A data transfer via a memory EP
pub enum Transfer<'d> {
    Read(&'d mut [u8]),
    Write(&'d [u8]),
}

impl<'d> Transfer<'d> {
    pub fn len(&self) -> usize {
        match self {
            Transfer::Read(d) => d.len(),
            Transfer::Write(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn perm(&self) -> Perm {
        match self {
            Transfer::Read(_) => Perm::R,
            Transfer::Write(_) => Perm::W,
        }
    }
}

/// The hardware below the kernel's TCU driver
///
/// The implementation decides how registers are written and commands are issued, e.g., via MMIO
/// on real hardware or within a simulated fabric.
pub trait HardwareBackend {
    /// Writes the registers of the local endpoint `ep`
    fn write_reg_block(&mut self, ep: EpId, regs: &[Reg]);

    /// Performs `xfer` at offset `off` within the region the local memory EP `ep` refers to
    fn issue_transfer(
        &mut self,
        ep: EpId,
        off: goff,
        xfer: Transfer<'_>,
        flags: CmdFlags,
    ) -> Result<(), Error>;

    /// Sends `msg` via the local send EP `ep`; the reply will arrive at `rpl_ep` with label
    /// `rpl_lbl`
    fn send(&mut self, ep: EpId, msg: &[u64], rpl_lbl: Label, rpl_ep: EpId) -> Result<(), Error>;

    /// Replies `reply` to `msg`, which has been received via the local receive EP `ep`
    fn reply(&mut self, ep: EpId, msg: &Message, reply: &[u64]) -> Result<(), Error>;

    /// Fetches the next unread message of the local receive EP `ep` and marks it as read
    fn fetch_msg(&mut self, ep: EpId) -> Option<Message>;

    /// Returns the current time in nanoseconds
    fn nanotime(&self) -> u64;

    /// Builds the external command to invalidate the TLB entry for `virt`
    fn inv_page_cmd(&self, virt: goff) -> Reg {
        TCU::build_ext_cmd(ExtCmdOpCode::InvPage, virt & !(cfg::PAGE_MASK as goff))
    }

    /// Builds the external command to invalidate `ep`
    fn inv_ep_cmd(&self, ep: EpId, force: bool) -> Reg {
        TCU::build_ext_cmd(ExtCmdOpCode::InvEP, ep as Reg | ((force as Reg) << 16))
    }

    /// Builds the external command to invalidate all TLB entries
    fn inv_tlb_cmd(&self) -> Reg {
        TCU::build_ext_cmd(ExtCmdOpCode::InvTLB, 0)
    }
}

/// Exclusive use of the scratch EP
///
/// Only one guard can exist at a time; the EP configuration and the following command are
/// therefore never interleaved with another transfer.
pub struct XferGuard<'k> {
    backend: RefMut<'k, Box<dyn HardwareBackend>>,
}

impl<'k> XferGuard<'k> {
    fn transfer(&mut self, target: TileAddr, addr: goff, xfer: Transfer<'_>) -> Result<(), Error> {
        let mut regs = [0; EP_REGS];
        TCU::config_mem(
            &mut regs,
            INVAL_ID,
            target.pe,
            target.vpe,
            addr,
            xfer.len(),
            xfer.perm(),
        );
        self.backend.write_reg_block(KTMP_EP, &regs);
        // the kernel never causes page faults
        self.backend.issue_transfer(KTMP_EP, 0, xfer, CmdFlags::NOPF)
    }

    fn send(
        &mut self,
        pe: PEId,
        ep: EpId,
        lbl: Label,
        msg: &[u64],
        rpl_lbl: Label,
        rpl_ep: EpId,
    ) -> Result<(), Error> {
        let mut regs = [0; EP_REGS];
        // the message order does not matter as long as it is large enough
        TCU::config_send(&mut regs, INVAL_ID, lbl, pe, ep, 8, UNLIM_CREDITS);
        self.backend.write_reg_block(KTMP_EP, &regs);
        self.backend.send(KTMP_EP, msg, rpl_lbl, rpl_ep)
    }
}

fn to_bytes(words: &[u64]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8], words: &mut [u64]) {
    for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(mem::size_of::<u64>())) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *w = u64::from_le_bytes(raw);
    }
}

/// The kernel's TCU
pub struct KTcu {
    backend: RefCell<Box<dyn HardwareBackend>>,
}

impl KTcu {
    pub fn new(backend: Box<dyn HardwareBackend>) -> Self {
        KTcu {
            backend: RefCell::new(backend),
        }
    }

    /// Enters the critical section of the scratch EP
    ///
    /// Panics if the critical section is already entered.
    pub fn lock(&self) -> XferGuard<'_> {
        XferGuard {
            backend: self.backend.borrow_mut(),
        }
    }

    pub fn nanotime(&self) -> u64 {
        self.backend.borrow().nanotime()
    }

    fn retry_gone<F>(&self, target: TileAddr, mut op: F) -> Result<(), Error>
    where
        F: FnMut(TileAddr) -> Result<(), Error>,
    {
        match op(target) {
            Err(e) if e.code() == Code::VPEGone && target.has_vpe() => {
                // the VPE has been switched out in the meantime; the tile is still there
                let tile = TileAddr::tile(target.pe);
                klog!(KTCU, "{:?} is gone, retrying with {:?}", target, tile);
                if let Err(e) = op(tile) {
                    panic!("Transfer to {:?} failed after retry: {:?}", tile, e);
                }
                Ok(())
            },
            res => res,
        }
    }

    /// Writes `data` to `addr` on `target`
    pub fn write_mem(&self, target: TileAddr, addr: goff, data: &[u8]) -> Result<(), Error> {
        klog!(KTCU, "writing {} bytes to {:?}:{:#x}", data.len(), target, addr);
        self.retry_gone(target, |t| {
            self.lock().transfer(t, addr, Transfer::Write(data))
        })
    }

    /// Reads `data.len()` bytes from `addr` on `target` into `data`
    pub fn read_mem(&self, target: TileAddr, addr: goff, data: &mut [u8]) -> Result<(), Error> {
        klog!(KTCU, "reading {} bytes from {:?}:{:#x}", data.len(), target, addr);
        self.retry_gone(target, |t| {
            self.lock().transfer(t, addr, Transfer::Read(&mut *data))
        })
    }

    pub fn write_words(&self, target: TileAddr, addr: goff, words: &[u64]) -> Result<(), Error> {
        self.write_mem(target, addr, &to_bytes(words))
    }

    pub fn read_words(&self, target: TileAddr, addr: goff, words: &mut [u64]) -> Result<(), Error> {
        let mut bytes = vec![0u8; words.len() * mem::size_of::<u64>()];
        self.read_mem(target, addr, &mut bytes)?;
        from_bytes(&bytes, words);
        Ok(())
    }

    pub fn write_word(&self, target: TileAddr, addr: goff, word: u64) -> Result<(), Error> {
        self.write_words(target, addr, &[word])
    }

    pub fn read_word(&self, target: TileAddr, addr: goff) -> Result<u64, Error> {
        let mut word = [0];
        self.read_words(target, addr, &mut word)?;
        Ok(word[0])
    }

    /// Zeros `size` bytes at `addr` on `target`, in chunks of `KTCU_BUF_SIZE`
    pub fn clear(&self, target: TileAddr, mut addr: goff, size: usize) -> Result<(), Error> {
        let buf = [0u8; cfg::KTCU_BUF_SIZE];
        let mut rem = size;
        while rem > 0 {
            let amount = cmp::min(rem, buf.len());
            self.write_mem(target, addr, &buf[0..amount])?;
            addr += amount as goff;
            rem -= amount;
        }
        Ok(())
    }

    /// Copies `size` bytes from `src_addr` on `src` to `dst_addr` on `dst`
    pub fn copy(
        &self,
        dst: TileAddr,
        mut dst_addr: goff,
        src: TileAddr,
        mut src_addr: goff,
        size: usize,
    ) -> Result<(), Error> {
        let mut buf = [0u8; cfg::KTCU_BUF_SIZE];
        let mut rem = size;
        while rem > 0 {
            let amount = cmp::min(rem, buf.len());
            self.read_mem(src, src_addr, &mut buf[0..amount])?;
            self.write_mem(dst, dst_addr, &buf[0..amount])?;
            src_addr += amount as goff;
            dst_addr += amount as goff;
            rem -= amount;
        }
        Ok(())
    }

    pub fn config_local_ep<CFG>(&self, ep: EpId, cfg: CFG)
    where
        CFG: FnOnce(&mut [Reg]),
    {
        let mut regs = [0; EP_REGS];
        cfg(&mut regs);
        self.backend.borrow_mut().write_reg_block(ep, &regs);
    }

    pub fn config_remote_ep<CFG>(&self, pe: PEId, ep: EpId, cfg: CFG) -> Result<(), Error>
    where
        CFG: FnOnce(&mut [Reg]),
    {
        let mut regs = [0; EP_REGS];
        cfg(&mut regs);
        self.write_ep_remote(pe, ep, &regs)
    }

    /// Configures the local receive EP `ep` for a buffer of `2^ord` bytes with `2^msg_ord`
    /// byte slots
    pub fn recv_msgs(&self, ep: EpId, buf: goff, ord: u32, msg_ord: u32) {
        self.config_local_ep(ep, |regs| {
            TCU::config_recv(regs, INVAL_ID, buf, ord, msg_ord, None);
        });
    }

    pub fn write_ep_remote(&self, pe: PEId, ep: EpId, regs: &[Reg]) -> Result<(), Error> {
        self.write_words(TileAddr::tile(pe), TCU::ep_regs_addr(ep), regs)
    }

    pub fn read_ep_remote(&self, pe: PEId, ep: EpId) -> Result<[Reg; EP_REGS], Error> {
        let mut regs = [0; EP_REGS];
        self.read_words(TileAddr::tile(pe), TCU::ep_regs_addr(ep), &mut regs)?;
        Ok(regs)
    }

    /// Writes `vals` to the external registers of `target`, starting at `first`
    pub fn write_ext_regs(
        &self,
        target: TileAddr,
        first: ExtReg,
        vals: &[Reg],
    ) -> Result<(), Error> {
        self.write_words(target, TCU::ext_reg_addr(first), vals)
    }

    /// Issues the external command `cmd` on `target` and waits for its completion
    ///
    /// Returns the result of the command.
    pub fn do_ext_cmd(&self, target: TileAddr, cmd: Reg) -> Result<Reg, Error> {
        let addr = TCU::ext_reg_addr(ExtReg::ExtCmd);
        self.write_word(target, addr, cmd)?;

        let res = loop {
            let res = self.read_word(target, addr)?;
            if TCU::ext_cmd_op(res) == ExtCmdOpCode::Idle {
                break res;
            }
        };

        match TCU::ext_cmd_error(res) {
            Code::Success => Ok(TCU::ext_cmd_arg(res)),
            e => Err(Error::new(e)),
        }
    }

    /// Invalidates `ep` on `pe` and returns the bitmask of unread messages
    pub fn invalidate_ep_remote(&self, pe: PEId, ep: EpId, force: bool) -> Result<u32, Error> {
        let cmd = self.backend.borrow().inv_ep_cmd(ep, force);
        self.do_ext_cmd(TileAddr::tile(pe), cmd).map(|unread| unread as u32)
    }

    /// Invalidates all reply EPs at `recv_pe` that belong to the receive EP `recv_ep` and that
    /// would send the reply to `send_ep` at `send_pe`
    pub fn inv_reply_remote(
        &self,
        recv_pe: PEId,
        recv_ep: EpId,
        send_pe: PEId,
        send_ep: EpId,
    ) -> Result<(), Error> {
        let regs = self.read_ep_remote(recv_pe, recv_ep)?;
        let (reply_eps, slots, occupied) = match TCU::unpack_recv_regs(&regs) {
            Some(r) => r,
            None => return Ok(()),
        };

        // if there is no occupied slot, there can't be any reply EP we have to invalidate
        let reply_eps = match reply_eps {
            Some(r) if occupied != 0 => r,
            _ => return Ok(()),
        };

        for i in 0..slots {
            if (occupied & (1 << i)) == 0 {
                continue;
            }

            let rep = reply_eps + i as EpId;
            let regs = self.read_ep_remote(recv_pe, rep)?;
            // is that replying to the sender?
            if let Some(info) = TCU::unpack_reply_regs(&regs) {
                if info.crd_ep == send_ep && info.pe == send_pe {
                    self.invalidate_ep_remote(recv_pe, rep, true)?;
                }
            }
        }

        Ok(())
    }

    /// Invalidates the TLB entry of `virt` on `target`
    ///
    /// The command is not awaited, because the EP used for the transfer is not reconfigured.
    pub fn invalidate_page_remote(&self, target: TileAddr, virt: goff) -> Result<(), Error> {
        let cmd = self.backend.borrow().inv_page_cmd(virt);
        self.write_word(target, TCU::ext_reg_addr(ExtReg::ExtCmd), cmd)
    }

    /// Invalidates all TLB entries on `target`
    pub fn invalidate_tlb_remote(&self, target: TileAddr) -> Result<(), Error> {
        let cmd = self.backend.borrow().inv_tlb_cmd();
        self.do_ext_cmd(target, cmd).map(|_| ())
    }

    /// Sends `msg` to `ep` at `pe` with label `lbl`
    pub fn send_to(
        &self,
        pe: PEId,
        ep: EpId,
        lbl: Label,
        msg: &[u64],
        rpl_lbl: Label,
        rpl_ep: EpId,
    ) -> Result<(), Error> {
        klog!(KTCU, "sending {} words to PE{}:EP{}", msg.len(), pe, ep);
        self.lock().send(pe, ep, lbl, msg, rpl_lbl, rpl_ep)
    }

    pub fn reply(&self, ep: EpId, msg: &Message, reply: &[u64]) -> Result<(), Error> {
        self.backend.borrow_mut().reply(ep, msg, reply)
    }

    pub fn fetch_msg(&self, ep: EpId) -> Option<Message> {
        self.backend.borrow_mut().fetch_msg(ep)
    }
}
