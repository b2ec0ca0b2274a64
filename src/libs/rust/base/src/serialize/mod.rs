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

//! Contains the serializing basics, which is used for the messages between the kernel and the
//! multiplexers
//!
//! Values are serialized into a sequence of 64-bit words: every primitive occupies one word,
//! structs and tuples are the concatenation of their fields, unit variants are the variant
//! index, `None` is `!0`, and sequences are prefixed by their length.

mod de;
mod error;
mod ser;

pub use self::de::WordDeserializer;
pub use self::ser::WordSerializer;
pub use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

use crate::col::Vec;
use crate::errors::Error;

/// Serializes the given value into a vector of words
pub fn to_words<T: Serialize>(value: &T) -> Result<Vec<u64>, Error> {
    let mut ser = WordSerializer::new();
    value.serialize(&mut ser)?;
    Ok(ser.into_words())
}

/// Deserializes a value of type `T` from the given words
pub fn from_words<'de, T: Deserialize<'de>>(words: &'de [u64]) -> Result<T, Error> {
    T::deserialize(&mut WordDeserializer::new(words))
}
