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

//! Contains the register layout of the TCU and the encoding of endpoint register images
//!
//! Nothing in here touches the hardware; the functions build and decode the values that the
//! kernel writes into the TCU registers of remote tiles.

use bitflags::bitflags;

use cfg_if::cfg_if;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::cfg;
use crate::col::Vec;
use crate::errors::Code;
use crate::goff;
use crate::kif::Perm;
use crate::mem;

/// A TCU register
pub type Reg = u64;
/// An endpoint id
pub type EpId = u16;
/// A TCU label used in send EPs
pub type Label = u64;
/// A PE id
pub type PEId = u16;
/// A VPE id
pub type VPEId = u16;

/// The total number of endpoints of each TCU
pub const EP_COUNT: EpId = 128;

/// The number of endpoints reserved for the physical-memory protection
pub const PMEM_PROT_EPS: usize = 4;

/// The send EP for kernel calls from the multiplexer
pub const KPEX_SEP: EpId = PMEM_PROT_EPS as EpId + 0;
/// The receive EP for kernel calls from the multiplexer
pub const KPEX_REP: EpId = PMEM_PROT_EPS as EpId + 1;
/// The receive EP for upcalls from the kernel to the multiplexer
pub const PEXUP_REP: EpId = PMEM_PROT_EPS as EpId + 2;
/// The reply EP for upcalls from the kernel to the multiplexer
pub const PEXUP_RPLEP: EpId = PMEM_PROT_EPS as EpId + 3;

/// The first EP that can be handed out to VPEs
pub const FIRST_USER_EP: EpId = PMEM_PROT_EPS as EpId + 4;

static_assertions::const_assert!(FIRST_USER_EP < EP_COUNT);

/// Represents an invalid endpoint
pub const INVALID_EP: EpId = 0xFFFF;
/// Represents no reply EPs in a receive EP
pub const NO_REPLIES: EpId = INVALID_EP;
/// Represents unlimited credits
pub const UNLIM_CREDITS: u32 = 0x3F;

/// The VPE id that is used in EPs that are not bound to a VPE
pub const INVALID_VPE: VPEId = 0xFFFF;

/// The base address of the TCU's MMIO area
pub const MMIO_ADDR: goff = 0xF000_0000;
/// The size of the TCU's MMIO area
pub const MMIO_SIZE: usize = cfg::PAGE_SIZE * 2;

cfg_if! {
    if #[cfg(feature = "hw22")] {
        /// Number of external registers
        pub const EXT_REGS: usize = 4;
        /// Number of unprivileged registers
        pub const UNPRIV_REGS: usize = 5;

        /// The external registers
        #[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
        #[repr(u64)]
        pub enum ExtReg {
            /// Stores the privileged and virtual-memory flags
            Features,
            /// For external commands
            ExtCmd,
            /// The root page table of the current VPE
            RootPT,
            /// The EP used to report page faults
            PFEp,
        }
    }
    else {
        /// Number of external registers
        pub const EXT_REGS: usize = 5;
        /// Number of unprivileged registers
        pub const UNPRIV_REGS: usize = 6;

        /// The external registers
        #[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
        #[repr(u64)]
        pub enum ExtReg {
            /// Stores the privileged and virtual-memory flags
            Features,
            /// Stores the tile description
            PEDesc,
            /// For external commands
            ExtCmd,
            /// The root page table of the current VPE
            RootPT,
            /// The EP used to report page faults
            PFEp,
        }
    }
}

cfg_if! {
    if #[cfg(feature = "hw22")] {
        /// The unprivileged registers
        #[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
        #[repr(u64)]
        pub enum UnprivReg {
            /// Starts commands and signals their completion
            Command,
            /// Specifies the data address and size
            Data,
            /// Specifies an additional argument
            Arg1,
            /// The current time in nanoseconds
            CurTime,
            /// Prints a line into the simulator log
            Print,
        }
    }
    else {
        /// The unprivileged registers
        #[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
        #[repr(u64)]
        pub enum UnprivReg {
            /// Starts commands and signals their completion
            Command,
            /// Specifies the data address
            DataAddr,
            /// Specifies the data size
            DataSize,
            /// Specifies an additional argument
            Arg1,
            /// The current time in nanoseconds
            CurTime,
            /// Prints a line into the simulator log
            Print,
        }
    }
}

/// The number of registers per EP
pub const EP_REGS: usize = 3;

bitflags! {
    /// The flags for the [`ExtReg::Features`] register
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FeatureFlags : Reg {
        /// Whether the tile is privileged
        const PRIV          = 1 << 0;
        /// Whether address translation is enabled
        const VM            = 1 << 1;
    }
}

bitflags! {
    /// The flags for data transfers
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CmdFlags : Reg {
        /// Report a translation fault as an error instead of raising a page fault
        const NOPF          = 1 << 0;
    }
}

/// The different endpoint types
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum EpType {
    /// Invalid endpoint (unusable)
    Invalid,
    /// Send endpoint
    Send,
    /// Receive endpoint
    Receive,
    /// Memory endpoint
    Memory,
}

/// The commands
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u64)]
pub enum CmdOpCode {
    /// The idle command has no effect
    Idle,
    /// Sends a message
    Send,
    /// Replies to a message
    Reply,
    /// Reads from external memory
    Read,
    /// Writes to external memory
    Write,
    /// Fetches a message
    FetchMsg,
    /// Acknowledges a message
    AckMsg,
}

/// The external commands
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum ExtCmdOpCode {
    /// The idle command has no effect
    Idle,
    /// Invalidate and endpoint, if possible
    InvEP,
    /// Invalidate a single TLB entry
    InvPage,
    /// Invalidate all TLB entries
    InvTLB,
    /// Reset the CU
    Reset,
}

/// The TCU header of a message
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Header {
    pub length: usize,
    pub sender_pe: PEId,
    pub sender_ep: EpId,
    pub reply_ep: EpId,
    pub reply_label: Label,
    pub label: Label,
}

/// A message that has been copied out of a receive buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub data: Vec<u64>,
}

/// The fields of a reply EP that matter for invalidations
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReplyInfo {
    /// The EP that receives the credits back
    pub crd_ep: EpId,
    /// The PE of the sender that is waiting for the reply
    pub pe: PEId,
}

/// The register layout of the TCU
pub struct TCU {}

impl TCU {
    /// Builds the register image of a receive EP
    pub fn config_recv(
        regs: &mut [Reg],
        vpe: VPEId,
        buf: goff,
        buf_ord: u32,
        msg_ord: u32,
        reply_eps: Option<EpId>,
    ) {
        regs[0] = (EpType::Receive as Reg)
            | ((vpe as Reg) << 3)
            | ((reply_eps.unwrap_or(NO_REPLIES) as Reg) << 19)
            | (((buf_ord - msg_ord) as Reg) << 35)
            | ((msg_ord as Reg) << 41);
        regs[1] = buf as Reg;
        regs[2] = 0;
    }

    /// Builds the register image of a send EP
    pub fn config_send(
        regs: &mut [Reg],
        vpe: VPEId,
        lbl: Label,
        pe: PEId,
        dst_ep: EpId,
        msg_order: u32,
        credits: u32,
    ) {
        regs[0] = (EpType::Send as Reg)
            | ((vpe as Reg) << 3)
            | ((credits as Reg) << 19)
            | ((credits as Reg) << 25)
            | ((msg_order as Reg) << 31);
        regs[1] = (dst_ep as Reg) | ((pe as Reg) << 16);
        regs[2] = lbl as Reg;
    }

    /// Builds the register image of a reply EP, as the TCU does on message reception
    pub fn config_reply(
        regs: &mut [Reg],
        vpe: VPEId,
        lbl: Label,
        pe: PEId,
        dst_ep: EpId,
        msg_order: u32,
        crd_ep: EpId,
    ) {
        Self::config_send(regs, vpe, lbl, pe, dst_ep, msg_order, 1);
        regs[0] |= ((crd_ep as Reg) << 37) | (1 << 53);
    }

    /// Builds the register image of a memory EP
    ///
    /// Accesses via this EP are only performed if `tgt_vpe` is the VPE currently running on the
    /// destination tile, unless `tgt_vpe` is [`INVALID_VPE`].
    pub fn config_mem(
        regs: &mut [Reg],
        vpe: VPEId,
        pe: PEId,
        tgt_vpe: VPEId,
        addr: goff,
        size: usize,
        perm: Perm,
    ) {
        regs[0] = (EpType::Memory as Reg)
            | ((vpe as Reg) << 3)
            | ((perm.bits() as Reg) << 19)
            | ((pe as Reg) << 23)
            | ((tgt_vpe as Reg) << 39);
        regs[1] = addr as Reg;
        regs[2] = size as Reg;
    }

    /// Returns the type of the EP described by the given registers
    pub fn ep_type(regs: &[Reg]) -> EpType {
        EpType::try_from(regs[0] & 0x7).unwrap_or(EpType::Invalid)
    }

    /// Returns the VPE the EP described by the given registers belongs to
    pub fn ep_vpe(regs: &[Reg]) -> VPEId {
        ((regs[0] >> 3) & 0xFFFF) as VPEId
    }

    /// Unpacks the given memory EP registers into the PE id, target VPE, address, size, and
    /// permissions.
    ///
    /// Returns `None` if the registers do not represent a memory EP.
    pub fn unpack_mem_regs(regs: &[Reg]) -> Option<(PEId, VPEId, goff, goff, Perm)> {
        if Self::ep_type(regs) != EpType::Memory {
            return None;
        }

        let pe = ((regs[0] >> 23) & 0xFFFF) as PEId;
        let tgt_vpe = ((regs[0] >> 39) & 0xFFFF) as VPEId;
        let perm = Perm::from_bits_truncate((regs[0] as u32 >> 19) & 0x3);
        Some((pe, tgt_vpe, regs[1], regs[2], perm))
    }

    /// Unpacks the given send EP registers into the PE id and EP id of the destination
    pub fn unpack_send_regs(regs: &[Reg]) -> Option<(PEId, EpId)> {
        if Self::ep_type(regs) != EpType::Send {
            return None;
        }

        Some((((regs[1] >> 16) & 0xFFFF) as PEId, (regs[1] & 0xFFFF) as EpId))
    }

    /// Unpacks the given receive EP registers into the first reply EP, the number of slots and
    /// the bitmask of occupied slots.
    pub fn unpack_recv_regs(regs: &[Reg]) -> Option<(Option<EpId>, usize, u32)> {
        if Self::ep_type(regs) != EpType::Receive {
            return None;
        }

        let reply_eps = ((regs[0] >> 19) & 0xFFFF) as EpId;
        let slots = 1 << ((regs[0] >> 35) & 0x3F);
        let occupied = (regs[2] & 0xFFFF_FFFF) as u32;
        let reply_eps = if reply_eps == NO_REPLIES { None } else { Some(reply_eps) };
        Some((reply_eps, slots, occupied))
    }

    /// Unpacks the given reply EP registers
    pub fn unpack_reply_regs(regs: &[Reg]) -> Option<ReplyInfo> {
        if Self::ep_type(regs) != EpType::Send || (regs[0] >> 53) & 0x1 == 0 {
            return None;
        }

        Some(ReplyInfo {
            crd_ep: ((regs[0] >> 37) & 0xFFFF) as EpId,
            pe: ((regs[1] >> 16) & 0xFFFF) as PEId,
        })
    }

    /// Builds a command for the unprivileged command register
    pub fn build_cmd(ep: EpId, cmd: CmdOpCode, arg: Reg) -> Reg {
        cmd as Reg | ((ep as Reg) << 4) | (arg << 25)
    }

    /// Extracts the error code of a completed command
    pub fn cmd_error(cmd: Reg) -> Code {
        Code::from(((cmd >> 20) & 0x1F) as u32)
    }

    /// Builds an external command with given argument
    pub fn build_ext_cmd(cmd: ExtCmdOpCode, arg: Reg) -> Reg {
        cmd as Reg | (arg << 9)
    }

    /// Returns the opcode of the given external command register value
    pub fn ext_cmd_op(val: Reg) -> ExtCmdOpCode {
        ExtCmdOpCode::try_from(val & 0xF).unwrap_or(ExtCmdOpCode::Idle)
    }

    /// Returns the argument of the given external command register value
    pub fn ext_cmd_arg(val: Reg) -> Reg {
        val >> 9
    }

    /// Builds the completion value of an external command with given error and result
    pub fn ext_cmd_result(err: Code, res: Reg) -> Reg {
        ExtCmdOpCode::Idle as Reg | ((u32::from(err) as Reg & 0x1F) << 4) | (res << 9)
    }

    /// Extracts the error code of a completed external command
    pub fn ext_cmd_error(val: Reg) -> Code {
        Code::from(((val >> 4) & 0x1F) as u32)
    }

    /// Returns the MMIO address for the given external register
    pub fn ext_reg_addr(reg: ExtReg) -> goff {
        MMIO_ADDR + (reg as goff) * mem::size_of::<Reg>() as goff
    }

    /// Returns the MMIO address for the given unprivileged register
    pub fn unpriv_reg_addr(reg: UnprivReg) -> goff {
        MMIO_ADDR + ((EXT_REGS as goff) + reg as goff) * mem::size_of::<Reg>() as goff
    }

    /// Returns the MMIO address of the given endpoint registers
    pub fn ep_regs_addr(ep: EpId) -> goff {
        MMIO_ADDR
            + ((EXT_REGS + UNPRIV_REGS + EP_REGS * ep as usize) * mem::size_of::<Reg>()) as goff
    }

    /// Returns the endpoint whose registers contain the given MMIO address, together with the
    /// register index within the EP
    pub fn ep_of_reg_addr(addr: goff) -> Option<(EpId, usize)> {
        let first = Self::ep_regs_addr(0);
        let end = Self::ep_regs_addr(EP_COUNT);
        if addr < first || addr >= end {
            return None;
        }
        let idx = ((addr - first) as usize) / mem::size_of::<Reg>();
        Some(((idx / EP_REGS) as EpId, idx % EP_REGS))
    }
}
