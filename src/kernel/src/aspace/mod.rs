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

//! The page tables of VPEs, which the kernel maintains remotely
//!
//! If a VPE is running, its page tables are accessed through the recursive entry of its root
//! table and thus via the virtual addresses of the VPE. Otherwise, the tables are walked
//! explicitly in physical memory, starting at the root table.

mod mapper;
mod walker;

pub use self::mapper::AddrSpaceMapper;
pub use self::walker::{EntryLoc, PageTableWalker, WalkMode};
