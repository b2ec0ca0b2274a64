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

use serde::de::value::U32Deserializer;
use serde::de::{
    DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer, SeqAccess, VariantAccess, Visitor,
};

use crate::errors::{Code, Error};

/// Recreates values from the words produced by [`WordSerializer`](super::WordSerializer)
#[derive(Debug)]
pub struct WordDeserializer<'de> {
    words: &'de [u64],
}

impl<'de> WordDeserializer<'de> {
    pub fn new(words: &'de [u64]) -> Self {
        WordDeserializer { words }
    }

    /// Returns the number of words that have not been consumed yet
    pub fn remaining(&self) -> usize {
        self.words.len()
    }

    fn peek(&self) -> Result<u64, Error> {
        self.words
            .first()
            .copied()
            .ok_or_else(|| Error::new(Code::InvArgs))
    }

    fn word(&mut self) -> Result<u64, Error> {
        let w = self.peek()?;
        self.words = &self.words[1..];
        Ok(w)
    }

    fn items(&mut self, len: usize) -> Items<'_, 'de> {
        Items { de: self, len }
    }
}

macro_rules! primitives {
    ($($method:ident => $visit:ident(|$w:ident| $val:expr)),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                let $w = self.word()?;
                visitor.$visit($val)
            }
        )*
    };
}

macro_rules! unsupported {
    ($($method:ident),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Error> {
                Err(Error::new(Code::NotSup))
            }
        )*
    };
}

impl<'de, 'a> Deserializer<'de> for &'a mut WordDeserializer<'de> {
    type Error = Error;

    fn is_human_readable(&self) -> bool {
        false
    }

    primitives! {
        deserialize_bool => visit_bool(|w| w == 1),
        deserialize_i8 => visit_i8(|w| w as i8),
        deserialize_i16 => visit_i16(|w| w as i16),
        deserialize_i32 => visit_i32(|w| w as i32),
        deserialize_i64 => visit_i64(|w| w as i64),
        deserialize_u8 => visit_u8(|w| w as u8),
        deserialize_u16 => visit_u16(|w| w as u16),
        deserialize_u32 => visit_u32(|w| w as u32),
        deserialize_u64 => visit_u64(|w| w),
        deserialize_f32 => visit_f32(|w| f32::from_bits(w as u32)),
        deserialize_f64 => visit_f64(|w| f64::from_bits(w)),
        deserialize_identifier => visit_u32(|w| w as u32),
    }

    unsupported! {
        deserialize_any,
        deserialize_str,
        deserialize_string,
        deserialize_bytes,
        deserialize_byte_buf,
        deserialize_map,
        deserialize_ignored_any,
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        let c = char::from_u32(self.word()? as u32).ok_or_else(|| Error::new(Code::InvArgs))?;
        visitor.visit_char(c)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        if self.peek()? == !0 {
            self.word()?;
            visitor.visit_none()
        }
        else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        let len = self.word()? as usize;
        visitor.visit_seq(self.items(len))
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_seq(self.items(len))
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_seq(self.items(len))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_seq(self.items(fields.len()))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_enum(self)
    }
}

/// A fixed number of consecutive values
struct Items<'a, 'de: 'a> {
    de: &'a mut WordDeserializer<'de>,
    len: usize,
}

impl<'de, 'a> SeqAccess<'de> for Items<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        if self.len == 0 {
            return Ok(None);
        }
        self.len -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.len)
    }
}

impl<'de, 'a> EnumAccess<'de> for &'a mut WordDeserializer<'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self), Error> {
        let idx = self.word()? as u32;
        let idx: U32Deserializer<Error> = idx.into_deserializer();
        let variant = seed.deserialize(idx)?;
        Ok((variant, self))
    }
}

impl<'de, 'a> VariantAccess<'de> for &'a mut WordDeserializer<'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Error> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_seq(self.items(len))
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_seq(self.items(fields.len()))
    }
}
