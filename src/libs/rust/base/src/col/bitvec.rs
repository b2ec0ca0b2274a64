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

use crate::col::Vec;
use crate::vec;

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-size bit vector that keeps track of its first clear bit
pub struct BitVec {
    bits: usize,
    first_clear: usize,
    words: Vec<u64>,
}

fn idx(bit: usize) -> usize {
    bit / WORD_BITS
}

fn bitpos(bit: usize) -> u64 {
    1 << (bit % WORD_BITS)
}

impl BitVec {
    pub fn new(bits: usize) -> Self {
        BitVec {
            bits,
            words: vec![0; (bits + WORD_BITS - 1) / WORD_BITS],
            first_clear: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.bits
    }

    pub fn is_set(&self, bit: usize) -> bool {
        self.words[idx(bit)] & bitpos(bit) != 0
    }

    /// Returns the first clear bit, or `size()` if all bits are set
    pub fn first_clear(&self) -> usize {
        self.first_clear
    }

    /// Returns the number of set bits
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn set(&mut self, bit: usize) {
        assert!(bit < self.bits);
        self.words[idx(bit)] |= bitpos(bit);
        if bit == self.first_clear {
            self.first_clear += 1;
            while self.first_clear < self.bits && self.is_set(self.first_clear) {
                self.first_clear += 1;
            }
        }
    }

    pub fn clear(&mut self, bit: usize) {
        assert!(bit < self.bits);
        self.words[idx(bit)] &= !bitpos(bit);
        if bit < self.first_clear {
            self.first_clear = bit;
        }
    }
}
