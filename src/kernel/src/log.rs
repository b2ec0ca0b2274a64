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

use base::io::{log, LogFlags};
use base::tcu::PEId;

pub const DEF: LogFlags = LogFlags::Info;
pub const ERR: LogFlags = LogFlags::Error;
pub const EPS: LogFlags = LogFlags::KernEPs;
pub const MEM: LogFlags = LogFlags::KernMem;
pub const PTES: LogFlags = LogFlags::KernPTEs;
pub const SQUEUE: LogFlags = LogFlags::KernSQueue;
pub const UPCALLS: LogFlags = LogFlags::KernUpcalls;
pub const KTCU: LogFlags = LogFlags::KernTCU;
pub const PEMUX: LogFlags = LogFlags::KernPEMux;

#[macro_export]
macro_rules! klog {
    ($type:tt, $fmt:expr)              => (
        base::log!($crate::log::$type, $fmt)
    );
    ($type:tt, $fmt:expr, $($arg:tt)*) => (
        base::log!($crate::log::$type, $fmt, $($arg)*)
    );
}

/// Enables the kernel log on `pe` with the given flags, writing each line to `sink`
pub fn init(pe: PEId, flags: LogFlags, sink: log::Sink) {
    log::init(pe, "kernel", flags, sink);
}
