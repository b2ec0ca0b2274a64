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
use core::ops;

use num_traits::PrimInt;

use crate::col::Vec;
use crate::errors::{Code, Error};
use crate::math;

#[derive(Clone, Copy)]
struct Area<T: PrimInt> {
    addr: T,
    size: T,
}

impl<T: PrimInt + fmt::LowerHex> fmt::Debug for Area<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Area[addr={:#x}, size={:#x}]", self.addr, self.size)
    }
}

/// The memory map, allowing allocs and frees of memory areas
///
/// The free areas are kept sorted by address; adjacent areas are merged on free.
pub struct MemMap<T: PrimInt> {
    areas: Vec<Area<T>>,
}

impl<T: PrimInt + ops::AddAssign + ops::SubAssign> MemMap<T> {
    /// Creates a new memory map from `addr` to `addr`+`size`.
    pub fn new(addr: T, size: T) -> Self {
        let mut areas = Vec::new();
        areas.push(Area { addr, size });
        MemMap { areas }
    }

    /// Allocates a region of `size` bytes, aligned by `align`.
    pub fn allocate(&mut self, size: T, align: T) -> Result<T, Error> {
        let idx = self
            .areas
            .iter()
            .position(|a| {
                let diff = math::round_up(a.addr, align) - a.addr;
                a.size > diff && a.size - diff >= size
            })
            .ok_or_else(|| Error::new(Code::OutOfMem))?;

        // if we need to do some alignment, keep the part in front as a separate area
        let diff = math::round_up(self.areas[idx].addr, align) - self.areas[idx].addr;
        let idx = if diff != T::zero() {
            let front = Area {
                addr: self.areas[idx].addr,
                size: diff,
            };
            self.areas[idx].addr += diff;
            self.areas[idx].size -= diff;
            self.areas.insert(idx, front);
            idx + 1
        }
        else {
            idx
        };

        // take it from the front
        let a = &mut self.areas[idx];
        let res = a.addr;
        a.size -= size;
        a.addr += size;
        if a.size == T::zero() {
            self.areas.remove(idx);
        }

        Ok(res)
    }

    /// Free's the given memory region defined by `addr` and `size`.
    pub fn free(&mut self, addr: T, size: T) {
        // index of the first area behind ours
        let next = self
            .areas
            .iter()
            .position(|a| addr <= a.addr)
            .unwrap_or(self.areas.len());

        let merge_prev = next > 0 && {
            let p = &self.areas[next - 1];
            p.addr + p.size == addr
        };
        let merge_next = next < self.areas.len() && addr + size == self.areas[next].addr;

        match (merge_prev, merge_next) {
            (true, true) => {
                let n = self.areas.remove(next);
                self.areas[next - 1].size += size + n.size;
            },
            (true, false) => self.areas[next - 1].size += size,
            (false, true) => {
                self.areas[next].addr -= size;
                self.areas[next].size += size;
            },
            (false, false) => self.areas.insert(next, Area { addr, size }),
        }
    }

    /// Returns the size of the largest contiguous free space
    pub fn largest_contiguous(&self) -> Option<T> {
        self.areas.iter().map(|a| a.size).max()
    }

    /// Returns a pair of the remaining space and the number of areas.
    pub fn size(&self) -> (T, usize) {
        let mut total = T::zero();
        for a in &self.areas {
            total += a.size;
        }
        (total, self.areas.len())
    }
}

impl<T: PrimInt + fmt::LowerHex> fmt::Debug for MemMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for a in &self.areas {
            writeln!(f, "    {:?}", a)?;
        }
        write!(f, "  ]")
    }
}
