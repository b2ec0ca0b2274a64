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

//! Contains the error handling types

use core::fmt;

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::serialize::{Deserialize, Deserializer, Serialize, Serializer};

/// The error codes
///
/// The first part mirrors the error field of the TCU's command and ext-command registers, so that
/// a raw hardware value can be converted directly into a `Code`. Unknown values (e.g., from a
/// newer multiplexer) become [`Code::Unspecified`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u32)]
pub enum Code {
    // success
    Success = 0,
    // TCU errors
    NoMEP,
    NoSEP,
    NoREP,
    ForeignEP,
    SendReplyEP,
    RecvGone,
    RecvNoSpace,
    RepliesDisabled,
    OutOfBounds,
    NoCredits,
    NoPerm,
    InvMsgOff,
    TranslationFault,
    Abort,
    UnknownCmd,
    RecvOutOfBounds,
    RecvInvReplyEPs,
    SendInvCreditEp,
    SendInvMsgSize,
    TimeoutMem,
    TimeoutNoC,
    PageBoundary,
    MsgUnaligned,
    TLBMiss,
    TLBFull,
    /// The VPE that was addressed by the transfer is no longer running on the tile
    VPEGone,
    // SW Errors
    InvArgs,
    OutOfMem,
    NotSup,
    NoSpace,
    Exists,
    EPInvalid,
    MsgsWaiting,
    UpcallReply,
    NotFound,
    Timeout,
    #[num_enum(default)]
    Unspecified,
}

impl Default for Code {
    fn default() -> Self {
        Self::Success
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32((*self).into())
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        u32::deserialize(d).map(Self::from)
    }
}

/// The error type of all fallible operations
///
/// For now, it only carries the [`Code`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    code: Code,
}

impl Error {
    pub fn new(code: Code) -> Self {
        Error { code }
    }

    pub fn code(&self) -> Code {
        self.code
    }
}

impl From<Error> for Code {
    fn from(err: Error) -> Self {
        err.code()
    }
}

impl From<Code> for Result<(), Error> {
    fn from(code: Code) -> Self {
        match code {
            Code::Success => Ok(()),
            e => Err(Error::new(e)),
        }
    }
}

impl From<u32> for Error {
    fn from(error: u32) -> Self {
        Self::new(Code::from(error))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({:?})", self.code)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.code, f)
    }
}
