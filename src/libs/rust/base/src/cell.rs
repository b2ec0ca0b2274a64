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

//! Shareable mutable containers
//!
//! The kernel runs single-threaded on its tile; its few global objects (the logger) therefore
//! only need interior mutability, not synchronization.

use core::fmt;

pub use core::cell::{Cell, Ref, RefCell, RefMut};

/// A cell for `Copy` values that can be placed in a static
pub struct StaticCell<T: Copy + Sized> {
    inner: Cell<T>,
}

unsafe impl<T: Copy + Sized> Sync for StaticCell<T> {
}

impl<T: Copy + Sized> StaticCell<T> {
    pub const fn new(val: T) -> Self {
        StaticCell {
            inner: Cell::new(val),
        }
    }

    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn set(&self, val: T) {
        self.inner.set(val);
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for StaticCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.get().fmt(f)
    }
}

/// A `RefCell` that can be placed in a static
///
/// Borrowing rules are still enforced at runtime.
pub struct StaticRefCell<T: Sized> {
    inner: RefCell<T>,
}

unsafe impl<T: Sized> Sync for StaticRefCell<T> {
}

impl<T: Sized> StaticRefCell<T> {
    pub const fn new(val: T) -> Self {
        StaticRefCell {
            inner: RefCell::new(val),
        }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }
}
