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

//! The base library shared by the kernel-side crates
//!
//! It contains the TCU register layout and the encoding of endpoint register images, the error
//! codes, the logging infrastructure, the interface to the tile-resident multiplexer, and a few
//! data structures and helpers that are used across the workspace.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub use alloc::vec;

/// Pointer types for heap allocation
pub mod boxed {
    pub use alloc::boxed::Box;
}

/// Single-threaded reference-counting pointers
pub mod rc {
    pub use alloc::rc::Rc;
}

#[macro_use]
pub mod io;

pub mod cell;
pub mod cfg;
pub mod col;
pub mod errors;
pub mod kif;
pub mod math;
pub mod mem;
pub mod serialize;
pub mod tcu;

pub use serde;

/// Global memory offset (an address within a tile's memory)
#[allow(non_camel_case_types)]
pub type goff = u64;
