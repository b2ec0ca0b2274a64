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

//! A simulated network of tiles for running the kernel on the host
//!
//! Every tile has a sparse physical memory, the external and EP registers of its TCU, and an
//! optional peer that answers the messages sent to the tile (standing in for the multiplexer).
//! Transfers that address a VPE fail with `VPEGone` if another VPE runs on the tile and are
//! translated via the tile's page tables if the tile has virtual memory.

use base::boxed::Box;
use base::cell::RefCell;
use base::cfg;
use base::col::{BTreeMap, Vec, VecDeque};
use base::errors::{Code, Error};
use base::goff;
use base::kif::Perm;
use base::mem::{size_of, GlobAddr};
use base::rc::Rc;
use base::tcu::{
    CmdFlags, EpId, ExtCmdOpCode, ExtReg, Header, Label, Message, PEId, Reg, VPEId, EP_COUNT,
    EP_REGS, EXT_REGS, INVALID_VPE, MMIO_ADDR, MMIO_SIZE, TCU,
};
use base::vec;

use core::cmp;

use paging::{PTEFlags, LEVEL_CNT, PTE_SIZE};

use crate::ktcu::{HardwareBackend, Transfer, KPEX_EP};

/// Answers the messages sent to a tile; returning `None` leaves the message unanswered
pub type PeerHandler = Box<dyn FnMut(&Message) -> Option<Vec<u64>>>;

/// A transfer that has been performed via a memory EP
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Access {
    pub pe: PEId,
    pub vpe: VPEId,
    pub addr: goff,
    pub len: usize,
    pub write: bool,
}

struct Tile {
    virtmem: bool,
    cur_vpe: VPEId,
    mem: BTreeMap<goff, Vec<u8>>,
    ext: [Reg; EXT_REGS],
    eps: Vec<[Reg; EP_REGS]>,
    unread: BTreeMap<EpId, u32>,
    ext_err: Option<Code>,
    handler: Option<PeerHandler>,
    inbox: Vec<Message>,
    replies: Vec<Vec<u64>>,
    inv_pages: Vec<goff>,
    inv_eps: Vec<EpId>,
    tlb_flushes: usize,
}

impl Tile {
    fn new(virtmem: bool) -> Self {
        Tile {
            virtmem,
            cur_vpe: INVALID_VPE,
            mem: BTreeMap::new(),
            ext: [0; EXT_REGS],
            eps: vec![[0; EP_REGS]; EP_COUNT as usize],
            unread: BTreeMap::new(),
            ext_err: None,
            handler: None,
            inbox: Vec::new(),
            replies: Vec::new(),
            inv_pages: Vec::new(),
            inv_eps: Vec::new(),
            tlb_flushes: 0,
        }
    }

    fn read_phys(&self, addr: goff, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            let a = addr + i as goff;
            let page = a >> cfg::PAGE_BITS;
            *b = self
                .mem
                .get(&page)
                .map(|p| p[(a as usize) & cfg::PAGE_MASK])
                .unwrap_or(0);
        }
    }

    fn write_phys(&mut self, addr: goff, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            let a = addr + i as goff;
            let page = self
                .mem
                .entry(a >> cfg::PAGE_BITS)
                .or_insert_with(|| vec![0; cfg::PAGE_SIZE]);
            page[(a as usize) & cfg::PAGE_MASK] = *b;
        }
    }

    fn read_reg(&self, addr: goff) -> Reg {
        let idx = ((addr - MMIO_ADDR) as usize) / size_of::<Reg>();
        if idx < EXT_REGS {
            self.ext[idx]
        }
        else if let Some((ep, reg)) = TCU::ep_of_reg_addr(addr) {
            self.eps[ep as usize][reg]
        }
        else {
            0
        }
    }

    fn write_reg(&mut self, addr: goff, val: Reg) {
        let idx = ((addr - MMIO_ADDR) as usize) / size_of::<Reg>();
        if idx == ExtReg::ExtCmd as usize {
            self.ext[idx] = self.ext_cmd(val);
        }
        else if idx < EXT_REGS {
            self.ext[idx] = val;
        }
        else if let Some((ep, reg)) = TCU::ep_of_reg_addr(addr) {
            self.eps[ep as usize][reg] = val;
        }
    }

    fn ext_cmd(&mut self, cmd: Reg) -> Reg {
        if let Some(e) = self.ext_err.take() {
            return TCU::ext_cmd_result(e, 0);
        }

        let arg = TCU::ext_cmd_arg(cmd);
        let res = match TCU::ext_cmd_op(cmd) {
            ExtCmdOpCode::InvEP => {
                let ep = (arg & 0xFFFF) as EpId;
                self.eps[ep as usize] = [0; EP_REGS];
                self.inv_eps.push(ep);
                self.unread.remove(&ep).unwrap_or(0) as Reg
            },
            ExtCmdOpCode::InvPage => {
                self.inv_pages.push(arg);
                0
            },
            ExtCmdOpCode::InvTLB => {
                self.tlb_flushes += 1;
                0
            },
            ExtCmdOpCode::Idle | ExtCmdOpCode::Reset => 0,
        };
        TCU::ext_cmd_result(Code::Success, res)
    }
}

fn is_mmio(addr: goff) -> bool {
    addr >= MMIO_ADDR && addr < MMIO_ADDR + MMIO_SIZE as goff
}

struct FabricState {
    kernel_pe: PEId,
    tiles: BTreeMap<PEId, Tile>,
    local_eps: Vec<[Reg; EP_REGS]>,
    queues: BTreeMap<EpId, VecDeque<Message>>,
    time: u64,
    tick: u64,
    gone_failures: usize,
    accesses: Vec<Access>,
}

impl FabricState {
    fn tile(&self, pe: PEId) -> Result<&Tile, Error> {
        self.tiles.get(&pe).ok_or_else(|| Error::new(Code::TimeoutNoC))
    }

    fn tile_mut(&mut self, pe: PEId) -> Result<&mut Tile, Error> {
        self.tiles
            .get_mut(&pe)
            .ok_or_else(|| Error::new(Code::TimeoutNoC))
    }

    fn read_glob(&self, addr: GlobAddr, data: &mut [u8]) -> Result<(), Error> {
        self.tile(addr.pe())?.read_phys(addr.offset(), data);
        Ok(())
    }

    /// Walks the page tables of `pe` for `virt` and returns the global address of the page
    fn translate(&self, pe: PEId, virt: goff, perm: Perm) -> Result<GlobAddr, Error> {
        let mut pt = GlobAddr::new(self.tile(pe)?.ext[ExtReg::RootPT as usize]);
        if !pt.has_pe() {
            return Err(Error::new(Code::TranslationFault));
        }

        for level in (0..LEVEL_CNT).rev() {
            let mut raw = [0u8; PTE_SIZE];
            let idx = paging::pte_index(virt, level) as goff;
            self.read_glob(pt + idx * PTE_SIZE as goff, &mut raw)?;
            let pte = u64::from_le_bytes(raw);

            let flags = paging::pte_flags(pte) & PTEFlags::RWX;
            if flags.is_empty() {
                return Err(Error::new(Code::TranslationFault));
            }
            if level == 0 && !flags.contains(PTEFlags::from(perm)) {
                return Err(Error::new(Code::NoPerm));
            }
            pt = GlobAddr::new(paging::pte_addr(pte));
            if !pt.has_pe() {
                return Err(Error::new(Code::TranslationFault));
            }
        }
        Ok(pt)
    }

    fn access(&mut self, ep: EpId, off: goff, xfer: Transfer<'_>) -> Result<(), Error> {
        let regs = self.local_eps[ep as usize];
        let (pe, vpe, base, size, perm) =
            TCU::unpack_mem_regs(&regs).ok_or_else(|| Error::new(Code::NoMEP))?;

        let write = matches!(xfer, Transfer::Write(_));
        let needed = if write { Perm::W } else { Perm::R };
        if !perm.contains(needed) {
            return Err(Error::new(Code::NoPerm));
        }
        if off + xfer.len() as goff > size {
            return Err(Error::new(Code::OutOfBounds));
        }

        let addr = base + off;
        self.accesses.push(Access {
            pe,
            vpe,
            addr,
            len: xfer.len(),
            write,
        });

        let translate = {
            let tile = self.tile(pe)?;
            if vpe != INVALID_VPE && tile.cur_vpe != vpe {
                return Err(Error::new(Code::VPEGone));
            }
            vpe != INVALID_VPE && tile.virtmem && !is_mmio(addr)
        };
        if vpe != INVALID_VPE && self.gone_failures > 0 {
            self.gone_failures -= 1;
            return Err(Error::new(Code::VPEGone));
        }

        if is_mmio(addr) {
            if addr % size_of::<Reg>() as goff != 0 || xfer.len() % size_of::<Reg>() != 0 {
                return Err(Error::new(Code::MsgUnaligned));
            }
            let tile = self.tile_mut(pe)?;
            match xfer {
                Transfer::Read(data) => {
                    for (i, chunk) in data.chunks_exact_mut(size_of::<Reg>()).enumerate() {
                        let val = tile.read_reg(addr + (i * size_of::<Reg>()) as goff);
                        chunk.copy_from_slice(&val.to_le_bytes());
                    }
                },
                Transfer::Write(data) => {
                    for (i, chunk) in data.chunks_exact(size_of::<Reg>()).enumerate() {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(chunk);
                        let reg_addr = addr + (i * size_of::<Reg>()) as goff;
                        tile.write_reg(reg_addr, Reg::from_le_bytes(raw));
                    }
                },
            }
            return Ok(());
        }

        // split the access at page boundaries, because every page is translated separately
        let len = xfer.len();
        let mut chunks = Vec::new();
        let mut pos = 0;
        while pos < len {
            let cur = addr + pos as goff;
            let amount = cmp::min(len - pos, cfg::PAGE_SIZE - (cur as usize & cfg::PAGE_MASK));
            let dst = if translate {
                let page = self.translate(pe, cur, needed)?;
                GlobAddr::new_with(page.pe(), page.offset() + (cur & cfg::PAGE_MASK as goff))
            }
            else {
                GlobAddr::new_with(pe, cur)
            };
            chunks.push((dst, pos, amount));
            pos += amount;
        }

        match xfer {
            Transfer::Read(data) => {
                for (dst, pos, amount) in chunks {
                    self.tile(dst.pe())?
                        .read_phys(dst.offset(), &mut data[pos..pos + amount]);
                }
            },
            Transfer::Write(data) => {
                for (dst, pos, amount) in chunks {
                    self.tile_mut(dst.pe())?
                        .write_phys(dst.offset(), &data[pos..pos + amount]);
                }
            },
        }
        Ok(())
    }
}

/// The simulated fabric; clones refer to the same fabric
#[derive(Clone)]
pub struct Fabric {
    state: Rc<RefCell<FabricState>>,
}

impl Fabric {
    /// Creates a fabric with the kernel running on `kernel_pe`
    pub fn new(kernel_pe: PEId) -> Self {
        let mut tiles = BTreeMap::new();
        tiles.insert(kernel_pe, Tile::new(false));
        Fabric {
            state: Rc::new(RefCell::new(FabricState {
                kernel_pe,
                tiles,
                local_eps: vec![[0; EP_REGS]; EP_COUNT as usize],
                queues: BTreeMap::new(),
                time: 0,
                tick: 1000,
                gone_failures: 0,
                accesses: Vec::new(),
            })),
        }
    }

    /// Adds a tile, optionally with address translation
    pub fn add_tile(&self, pe: PEId, virtmem: bool) {
        self.state.borrow_mut().tiles.insert(pe, Tile::new(virtmem));
    }

    /// Switches the VPE running on `pe`
    pub fn set_vpe(&self, pe: PEId, vpe: VPEId) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.cur_vpe = vpe;
        }
    }

    /// Installs the peer that answers messages sent to `pe`
    pub fn set_handler(&self, pe: PEId, handler: PeerHandler) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.handler = Some(handler);
        }
    }

    /// Lets the next `count` transfers that address a VPE fail with `VPEGone`
    pub fn inject_gone(&self, count: usize) {
        self.state.borrow_mut().gone_failures = count;
    }

    /// Lets the next external command on `pe` fail with `code`
    pub fn inject_ext_error(&self, pe: PEId, code: Code) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.ext_err = Some(code);
        }
    }

    /// Marks the slots in `mask` of the receive EP `ep` on `pe` as unread
    pub fn set_unread(&self, pe: PEId, ep: EpId, mask: u32) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.unread.insert(ep, mask);
        }
    }

    pub fn read_phys(&self, pe: PEId, addr: goff, data: &mut [u8]) {
        if let Some(t) = self.state.borrow().tiles.get(&pe) {
            t.read_phys(addr, data);
        }
    }

    pub fn write_phys(&self, pe: PEId, addr: goff, data: &[u8]) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.write_phys(addr, data);
        }
    }

    pub fn read_word(&self, pe: PEId, addr: goff) -> u64 {
        let mut raw = [0u8; 8];
        self.read_phys(pe, addr, &mut raw);
        u64::from_le_bytes(raw)
    }

    pub fn write_word(&self, pe: PEId, addr: goff, val: u64) {
        self.write_phys(pe, addr, &val.to_le_bytes());
    }

    /// Translates `virt` via the page tables that are installed on `pe`
    pub fn translate(&self, pe: PEId, virt: goff, perm: Perm) -> Result<GlobAddr, Error> {
        self.state.borrow().translate(pe, virt, perm)
    }

    pub fn ep_regs(&self, pe: PEId, ep: EpId) -> [Reg; EP_REGS] {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.eps[ep as usize])
            .unwrap_or([0; EP_REGS])
    }

    pub fn set_ep_regs(&self, pe: PEId, ep: EpId, regs: [Reg; EP_REGS]) {
        if let Some(t) = self.state.borrow_mut().tiles.get_mut(&pe) {
            t.eps[ep as usize] = regs;
        }
    }

    pub fn ext_reg(&self, pe: PEId, reg: ExtReg) -> Reg {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.ext[reg as usize])
            .unwrap_or(0)
    }

    pub fn local_ep_regs(&self, ep: EpId) -> [Reg; EP_REGS] {
        self.state.borrow().local_eps[ep as usize]
    }

    /// Returns all messages that have been sent to `pe`
    pub fn inbox(&self, pe: PEId) -> Vec<Message> {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.inbox.clone())
            .unwrap_or_default()
    }

    /// Returns the replies the kernel sent to calls from `pe`
    pub fn replies(&self, pe: PEId) -> Vec<Vec<u64>> {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.replies.clone())
            .unwrap_or_default()
    }

    /// Returns the pages whose TLB entries have been invalidated on `pe`
    pub fn inv_pages(&self, pe: PEId) -> Vec<goff> {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.inv_pages.clone())
            .unwrap_or_default()
    }

    /// Returns the EPs that have been invalidated on `pe`
    pub fn inv_eps(&self, pe: PEId) -> Vec<EpId> {
        let state = self.state.borrow();
        state
            .tiles
            .get(&pe)
            .map(|t| t.inv_eps.clone())
            .unwrap_or_default()
    }

    pub fn tlb_flushes(&self, pe: PEId) -> usize {
        let state = self.state.borrow();
        state.tiles.get(&pe).map(|t| t.tlb_flushes).unwrap_or(0)
    }

    /// Returns all transfers performed so far
    pub fn accesses(&self) -> Vec<Access> {
        self.state.borrow().accesses.clone()
    }

    pub fn clear_accesses(&self) {
        self.state.borrow_mut().accesses.clear();
    }

    /// Delivers a call from the multiplexer on `pe` to the kernel
    pub fn call_kernel(&self, pe: PEId, data: Vec<u64>) {
        let msg = Message {
            header: Header {
                length: data.len() * size_of::<u64>(),
                sender_pe: pe,
                label: pe as Label,
                ..Header::default()
            },
            data,
        };
        self.state
            .borrow_mut()
            .queues
            .entry(KPEX_EP)
            .or_default()
            .push_back(msg);
    }
}

impl HardwareBackend for Fabric {
    fn write_reg_block(&mut self, ep: EpId, regs: &[Reg]) {
        self.state.borrow_mut().local_eps[ep as usize].copy_from_slice(regs);
    }

    fn issue_transfer(
        &mut self,
        ep: EpId,
        off: goff,
        xfer: Transfer<'_>,
        _flags: CmdFlags,
    ) -> Result<(), Error> {
        self.state.borrow_mut().access(ep, off, xfer)
    }

    fn send(&mut self, ep: EpId, msg: &[u64], rpl_lbl: Label, rpl_ep: EpId) -> Result<(), Error> {
        let (pe, dst_ep, handler, msg) = {
            let mut state = self.state.borrow_mut();
            let regs = state.local_eps[ep as usize];
            let (pe, dst_ep) =
                TCU::unpack_send_regs(&regs).ok_or_else(|| Error::new(Code::NoSEP))?;
            let msg = Message {
                header: Header {
                    length: msg.len() * size_of::<u64>(),
                    sender_pe: state.kernel_pe,
                    sender_ep: ep,
                    reply_ep: rpl_ep,
                    reply_label: rpl_lbl,
                    label: regs[2],
                },
                data: msg.to_vec(),
            };

            let tile = state
                .tiles
                .get_mut(&pe)
                .ok_or_else(|| Error::new(Code::RecvGone))?;
            tile.inbox.push(msg.clone());
            (pe, dst_ep, tile.handler.take(), msg)
        };

        // the peer may inspect the fabric, so that it must not be borrowed here
        if let Some(mut handler) = handler {
            let reply = handler(&msg);

            let mut state = self.state.borrow_mut();
            if let Some(tile) = state.tiles.get_mut(&pe) {
                if tile.handler.is_none() {
                    tile.handler = Some(handler);
                }
            }
            if let Some(data) = reply {
                let reply = Message {
                    header: Header {
                        length: data.len() * size_of::<u64>(),
                        sender_pe: pe,
                        sender_ep: dst_ep,
                        label: rpl_lbl,
                        ..Header::default()
                    },
                    data,
                };
                state.queues.entry(rpl_ep).or_default().push_back(reply);
            }
        }
        Ok(())
    }

    fn reply(&mut self, _ep: EpId, msg: &Message, reply: &[u64]) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        let tile = state
            .tiles
            .get_mut(&msg.header.sender_pe)
            .ok_or_else(|| Error::new(Code::RecvGone))?;
        tile.replies.push(reply.to_vec());
        Ok(())
    }

    fn fetch_msg(&mut self, ep: EpId) -> Option<Message> {
        self.state
            .borrow_mut()
            .queues
            .get_mut(&ep)
            .and_then(|q| q.pop_front())
    }

    fn nanotime(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.time += state.tick;
        state.time
    }
}
