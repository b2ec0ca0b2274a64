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

//! The target-dependent configuration

use crate::goff;

pub const PAGE_BITS: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// The receive buffer area of tiles with virtual memory
pub const RECVBUF_SPACE: goff = 0xD000_0000;
pub const RECVBUF_SIZE: goff = 4 * PAGE_SIZE as goff;
/// The receive buffer size of tiles with a scratchpad memory
pub const RECVBUF_SIZE_SPM: goff = 0xE000;

/// Chunk size for buffered remote transfers (clear and copy)
pub const KTCU_BUF_SIZE: usize = 1024;

pub const KPEX_RBUF_ORD: u32 = 6;
pub const PEXUP_RBUF_ORD: u32 = 7;

pub const KPEX_RBUF_SIZE: goff = 1 << KPEX_RBUF_ORD;
pub const PEXUP_RBUF_SIZE: goff = 1 << PEXUP_RBUF_ORD;

/// The kernel's receive buffer for replies to upcalls and for multiplexer calls
pub const KSRV_RBUF_ORD: u32 = 6;
pub const KSRV_RBUF_SLOTS: u32 = 32;
