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

use bitflags::bitflags;

bitflags! {
    /// The permission bitmap that is used for memory and mapping capabilities.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct Perm : u32 {
        /// Read permission
        const R = 1;
        /// Write permission
        const W = 2;
        /// Execute permission
        const X = 4;
        /// Read + write permission
        const RW = Self::R.bits() | Self::W.bits();
        /// Read + write + execute permission
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}
