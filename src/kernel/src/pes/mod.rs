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

use core::fmt;

use base::tcu::{PEId, VPEId, INVALID_VPE};

mod pemux;
mod vpemng;

pub use self::pemux::PEMux;
pub use self::vpemng::{VPEInfo, VPEMng, VPERegistry};

/// The VPE id that addresses a tile as a whole, regardless of what runs on it
pub const INVAL_ID: VPEId = INVALID_VPE;

/// The lifecycle state of a VPE
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// The VPE runs on its tile; its page tables are active
    Running,
    /// The VPE is not running; its page tables are only reachable in memory
    Parked,
    /// The VPE has exited
    Dead,
}

/// The destination of a remote access: a tile, optionally restricted to a VPE
///
/// If `vpe` is not [`INVAL_ID`], the access only succeeds while `vpe` is running on the tile and
/// addresses are virtual addresses of `vpe`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct TileAddr {
    pub pe: PEId,
    pub vpe: VPEId,
}

impl TileAddr {
    pub fn new(pe: PEId, vpe: VPEId) -> Self {
        TileAddr { pe, vpe }
    }

    /// Addresses the physical memory and registers of `pe`
    pub fn tile(pe: PEId) -> Self {
        Self::new(pe, INVAL_ID)
    }

    pub fn has_vpe(&self) -> bool {
        self.vpe != INVAL_ID
    }
}

impl fmt::Debug for TileAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.has_vpe() {
            true => write!(f, "PE{}:VPE{}", self.pe, self.vpe),
            false => write!(f, "PE{}", self.pe),
        }
    }
}
