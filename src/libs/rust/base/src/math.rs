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

//! Alignment helpers

use num_traits::PrimInt;

/// Returns the smallest multiple of `align` that is not below `value`
///
/// `align` has to be a power of two.
///
/// ```
/// assert_eq!(base::math::round_up(0x1008u64, 0x1000), 0x2000);
/// assert_eq!(base::math::round_up(0x2000u64, 0x1000), 0x2000);
/// ```
pub fn round_up<T: PrimInt>(value: T, align: T) -> T {
    let mask = align - T::one();
    (value + mask) & !mask
}
