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

use core::str;

bitflags! {
    /// All log flags
    ///
    /// There are three general flags: `Info`, `Debug`, and `Error`, of which `Info` and `Error` are
    /// enabled by default. The remaining flags control the logging of certain aspects within the
    /// libraries or the kernel. The kernel receives the enabled flags as a boot argument.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LogFlags : u128 {
        /// General: informational output (enabled by default)
        const Info          = 1 << 0;
        /// General: debugging output (disable by default)
        const Debug         = 1 << 1;
        /// General: error output (enabled by default)
        const Error         = 1 << 2;

        #[doc(hidden)]
        const __lib_start = 3;

        /// libraries: thread switching and events
        const LibThread     = 1 << (Self::__lib_start.bits() + 0);

        #[doc(hidden)]
        const __kern_start = Self::__lib_start.bits() + 1;

        /// kernel: endpoint configurations
        const KernEPs       = 1 << (Self::__kern_start.bits() + 0);
        /// kernel: memory allocations
        const KernMem       = 1 << (Self::__kern_start.bits() + 1);
        /// kernel: page table entry updates
        const KernPTEs      = 1 << (Self::__kern_start.bits() + 2);
        /// kernel: send queue
        const KernSQueue    = 1 << (Self::__kern_start.bits() + 3);
        /// kernel: upcalls to the multiplexers
        const KernUpcalls   = 1 << (Self::__kern_start.bits() + 4);
        /// kernel: remote memory transfers and ext commands
        const KernTCU       = 1 << (Self::__kern_start.bits() + 5);
        /// kernel: calls from the multiplexers and EP allocation
        const KernPEMux     = 1 << (Self::__kern_start.bits() + 6);
    }
}

impl str::FromStr for LogFlags {
    type Err = bitflags::parser::ParseError;

    /// Parses flags in the form `Info|KernEPs|KernPTEs`
    fn from_str(flags: &str) -> Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}
