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

use base::col::{BTreeMap, Vec};
use base::errors::{Code, Error};
use base::goff;
use base::mem::size_of;
use base::tcu::{
    CmdFlags, CmdOpCode, EpId, EpType, Header, Label, Message, Reg, UnprivReg, INVALID_EP, TCU,
};

use cfg_if::cfg_if;

use core::ptr;

use crate::ktcu::{HardwareBackend, Transfer};

/// The message header as the TCU stores it in receive buffers
#[repr(C)]
struct RawHeader {
    // length (32 bits), sender PE (16 bits), sender EP (16 bits)
    info: u64,
    reply_ep: u64,
    reply_label: u64,
    label: u64,
}

fn read_reg(addr: goff) -> Reg {
    unsafe { ptr::read_volatile(addr as *const Reg) }
}

fn write_reg(addr: goff, val: Reg) {
    unsafe { ptr::write_volatile(addr as *mut Reg, val) }
}

cfg_if! {
    if #[cfg(feature = "hw22")] {
        fn set_data(addr: usize, size: usize) {
            write_reg(TCU::unpriv_reg_addr(UnprivReg::Data), addr as Reg | ((size as Reg) << 32));
        }
    }
    else {
        fn set_data(addr: usize, size: usize) {
            write_reg(TCU::unpriv_reg_addr(UnprivReg::DataAddr), addr as Reg);
            write_reg(TCU::unpriv_reg_addr(UnprivReg::DataSize), size as Reg);
        }
    }
}

/// The TCU of the kernel's tile, accessed via MMIO
#[derive(Default)]
pub struct MMIOBackend {
    rbufs: BTreeMap<EpId, goff>,
    // fetched messages that wait for a reply, by EP and offset
    unreplied: Vec<(EpId, Header, goff)>,
}

impl MMIOBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn exec_command(ep: EpId, cmd: CmdOpCode, arg: Reg) -> Result<(), Error> {
        write_reg(
            TCU::unpriv_reg_addr(UnprivReg::Command),
            TCU::build_cmd(ep, cmd, arg),
        );

        let res = loop {
            let res = read_reg(TCU::unpriv_reg_addr(UnprivReg::Command));
            if (res & 0xF) == CmdOpCode::Idle as Reg {
                break res;
            }
        };

        match TCU::cmd_error(res) {
            Code::Success => Ok(()),
            e => Err(Error::new(e)),
        }
    }
}

impl HardwareBackend for MMIOBackend {
    fn write_reg_block(&mut self, ep: EpId, regs: &[Reg]) {
        if TCU::ep_type(regs) == EpType::Receive {
            self.rbufs.insert(ep, regs[1]);
        }
        for (i, r) in regs.iter().enumerate() {
            write_reg(TCU::ep_regs_addr(ep) + (i * size_of::<Reg>()) as goff, *r);
        }
    }

    fn issue_transfer(
        &mut self,
        ep: EpId,
        off: goff,
        xfer: Transfer<'_>,
        flags: CmdFlags,
    ) -> Result<(), Error> {
        let (cmd, addr, len) = match xfer {
            Transfer::Read(data) => (CmdOpCode::Read, data.as_mut_ptr() as usize, data.len()),
            Transfer::Write(data) => (CmdOpCode::Write, data.as_ptr() as usize, data.len()),
        };
        set_data(addr, len);
        write_reg(TCU::unpriv_reg_addr(UnprivReg::Arg1), off);
        Self::exec_command(ep, cmd, flags.bits())
    }

    fn send(&mut self, ep: EpId, msg: &[u64], rpl_lbl: Label, rpl_ep: EpId) -> Result<(), Error> {
        set_data(msg.as_ptr() as usize, msg.len() * size_of::<u64>());
        write_reg(TCU::unpriv_reg_addr(UnprivReg::Arg1), rpl_lbl);
        Self::exec_command(ep, CmdOpCode::Send, rpl_ep as Reg)
    }

    fn reply(&mut self, ep: EpId, msg: &Message, reply: &[u64]) -> Result<(), Error> {
        let idx = self
            .unreplied
            .iter()
            .position(|(e, h, _)| *e == ep && *h == msg.header)
            .ok_or_else(|| Error::new(Code::InvArgs))?;
        let (_, _, off) = self.unreplied.remove(idx);

        set_data(reply.as_ptr() as usize, reply.len() * size_of::<u64>());
        // replying acknowledges the message as well
        Self::exec_command(ep, CmdOpCode::Reply, off)
    }

    fn fetch_msg(&mut self, ep: EpId) -> Option<Message> {
        let rbuf = *self.rbufs.get(&ep)?;
        Self::exec_command(ep, CmdOpCode::FetchMsg, 0).ok()?;
        let off = read_reg(TCU::unpriv_reg_addr(UnprivReg::Arg1));
        if off == !0 {
            return None;
        }

        let addr = rbuf + off;
        let raw = unsafe { ptr::read_volatile(addr as *const RawHeader) };
        let header = Header {
            length: (raw.info & 0xFFFF_FFFF) as usize,
            sender_pe: ((raw.info >> 32) & 0xFFFF) as u16,
            sender_ep: ((raw.info >> 48) & 0xFFFF) as EpId,
            reply_ep: raw.reply_ep as EpId,
            reply_label: raw.reply_label,
            label: raw.label,
        };

        let words = header.length / size_of::<u64>();
        let data_addr = (addr + size_of::<RawHeader>() as goff) as *const u64;
        let data = (0..words)
            .map(|i| unsafe { ptr::read_volatile(data_addr.add(i)) })
            .collect::<Vec<u64>>();

        if header.reply_ep != INVALID_EP {
            self.unreplied.push((ep, header, off));
        }
        else {
            Self::exec_command(ep, CmdOpCode::AckMsg, off).ok()?;
        }

        Some(Message { header, data })
    }

    fn nanotime(&self) -> u64 {
        read_reg(TCU::unpriv_reg_addr(UnprivReg::CurTime))
    }
}
