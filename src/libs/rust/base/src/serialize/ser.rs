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

use serde::ser::{self, Impossible, Serialize, Serializer};

use crate::col::Vec;
use crate::errors::{Code, Error};

/// Serializes values into words, one word per primitive
#[derive(Default)]
pub struct WordSerializer {
    words: Vec<u64>,
}

impl WordSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_words(self) -> Vec<u64> {
        self.words
    }

    fn word(&mut self, word: u64) -> Result<(), Error> {
        self.words.push(word);
        Ok(())
    }
}

macro_rules! primitives {
    ($($method:ident: $ty:ty => |$v:ident| $word:expr),* $(,)?) => {
        $(
            fn $method(self, $v: $ty) -> Result<(), Error> {
                self.word($word)
            }
        )*
    };
}

impl<'a> Serializer for &'a mut WordSerializer {
    type Error = Error;
    type Ok = ();
    type SerializeMap = Impossible<(), Error>;
    type SerializeSeq = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;

    // bitflags and friends have to use their compact representation
    fn is_human_readable(&self) -> bool {
        false
    }

    primitives! {
        serialize_bool: bool => |v| v as u64,
        serialize_i8: i8 => |v| v as u64,
        serialize_i16: i16 => |v| v as u64,
        serialize_i32: i32 => |v| v as u64,
        serialize_i64: i64 => |v| v as u64,
        serialize_u8: u8 => |v| v as u64,
        serialize_u16: u16 => |v| v as u64,
        serialize_u32: u32 => |v| v as u64,
        serialize_u64: u64 => |v| v,
        serialize_f32: f32 => |v| v.to_bits() as u64,
        serialize_f64: f64 => |v| v.to_bits(),
        serialize_char: char => |v| v as u64,
    }

    fn serialize_str(self, _v: &str) -> Result<(), Error> {
        Err(Error::new(Code::NotSup))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), Error> {
        Err(Error::new(Code::NotSup))
    }

    fn serialize_none(self) -> Result<(), Error> {
        self.word(!0)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Error> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), Error> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        idx: u32,
        _variant: &'static str,
    ) -> Result<(), Error> {
        self.word(idx as u64)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        idx: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        self.word(idx as u64)?;
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        let len = len.ok_or_else(|| Error::new(Code::NotSup))?;
        self.word(len as u64)?;
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        idx: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        self.word(idx as u64)?;
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Err(Error::new(Code::NotSup))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        idx: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        self.word(idx as u64)?;
        Ok(self)
    }
}

// compound values are just the concatenation of their parts
macro_rules! compound {
    ($trait:ident::$method:ident) => {
        impl<'a> ser::$trait for &'a mut WordSerializer {
            type Error = Error;
            type Ok = ();

            fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
                value.serialize(&mut **self)
            }

            fn end(self) -> Result<(), Error> {
                Ok(())
            }
        }
    };
    ($trait:ident::$method:ident with key) => {
        impl<'a> ser::$trait for &'a mut WordSerializer {
            type Error = Error;
            type Ok = ();

            fn $method<T: ?Sized + Serialize>(
                &mut self,
                _key: &'static str,
                value: &T,
            ) -> Result<(), Error> {
                value.serialize(&mut **self)
            }

            fn end(self) -> Result<(), Error> {
                Ok(())
            }
        }
    };
}

compound!(SerializeSeq::serialize_element);
compound!(SerializeTuple::serialize_element);
compound!(SerializeTupleStruct::serialize_field);
compound!(SerializeTupleVariant::serialize_field);
compound!(SerializeStruct::serialize_field with key);
compound!(SerializeStructVariant::serialize_field with key);
