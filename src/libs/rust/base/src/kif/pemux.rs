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

//! The kernel-pemux interface
//!
//! The kernel sends upcalls to the multiplexer running on a tile via the tile's `PEXUP_REP`;
//! the multiplexer calls the kernel via its `KPEX_SEP`. All messages are serialized as words
//! with the serializer in [`serialize`](crate::serialize), starting with the opcode.

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::errors::Code;
use crate::goff;
use crate::kif::Perm;
use crate::mem::GlobAddr;
use crate::serialize::{Deserialize, Serialize};
use crate::tcu::{EpId, VPEId};

/// The VPE id of PEMux
pub const VPE_ID: VPEId = 0xFFFF;

/// The upcalls from the kernel to PEMux
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
pub enum Upcalls {
    VPECtrl,
    Map,
    Translate,
    RemMsgs,
    EpInval,
}

/// The operations for the `vpe_ctrl` upcall
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
pub enum VPEOp {
    Init,
    Start,
    Stop,
}

/// The VPE control upcall
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VPECtrl {
    pub op: Upcalls,
    pub vpe_sel: VPEId,
    pub vpe_op: VPEOp,
    pub eps_start: EpId,
}

/// The map upcall
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Map {
    pub op: Upcalls,
    pub vpe_sel: VPEId,
    pub virt: goff,
    pub global: GlobAddr,
    pub pages: usize,
    pub perm: Perm,
}

/// The translate upcall
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translate {
    pub op: Upcalls,
    pub vpe_sel: VPEId,
    pub virt: goff,
    pub perm: Perm,
}

/// The remove messages upcall
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemMsgs {
    pub op: Upcalls,
    pub vpe_sel: VPEId,
    pub unread_mask: u32,
}

/// The EP invalidation upcall
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpInval {
    pub op: Upcalls,
    pub vpe_sel: VPEId,
    pub ep: EpId,
}

/// The upcall response
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub error: Code,
    pub val: u64,
}

/// The calls from PEMux to the kernel
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
pub enum Calls {
    Exit,
}

/// The exit call
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub op: Calls,
    pub vpe_sel: VPEId,
    pub code: i32,
}
