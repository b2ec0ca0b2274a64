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

use base::errors::{Code, Error};
use base::goff;
use base::io::LogFlags;

/// The kernel's boot arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Args {
    /// The amount of memory the kernel may use for page tables and its own data
    pub kmem: goff,
    /// The time in nanoseconds after which an unanswered upcall is considered fatal
    pub upcall_timeout: Option<u64>,
    /// The enabled log flags
    pub log: LogFlags,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            kmem: 64 * 1024 * 1024,
            upcall_timeout: None,
            log: LogFlags::Info | LogFlags::Error,
        }
    }
}

/// Parses the kernel arguments; `argv[0]` is the program name
///
/// Supported are `-m <kmem>` (with an optional K/M/G suffix), `-t <upcall timeout in ns>`, and
/// `-l <log flags>` (e.g., `Info|KernEPs`).
pub fn parse(argv: &[&str]) -> Result<Args, Error> {
    let mut args = Args::default();

    let mut i = 1;
    while i < argv.len() {
        match argv[i] {
            "-m" => {
                let kmem =
                    parse_size(value(argv, &mut i)?).ok_or_else(|| Error::new(Code::InvArgs))?;
                if kmem == 0 {
                    return Err(Error::new(Code::InvArgs));
                }
                args.kmem = kmem;
            },
            "-t" => {
                let ns = value(argv, &mut i)?
                    .parse::<u64>()
                    .map_err(|_| Error::new(Code::InvArgs))?;
                args.upcall_timeout = Some(ns);
            },
            "-l" => {
                args.log = value(argv, &mut i)?
                    .parse()
                    .map_err(|_| Error::new(Code::InvArgs))?;
            },
            _ => return Err(Error::new(Code::InvArgs)),
        }
        i += 1;
    }

    Ok(args)
}

fn value<'a>(argv: &[&'a str], i: &mut usize) -> Result<&'a str, Error> {
    *i += 1;
    argv.get(*i).copied().ok_or_else(|| Error::new(Code::InvArgs))
}

fn parse_size(s: &str) -> Option<goff> {
    let mul = match s.chars().last() {
        Some(c) if c.is_ascii_digit() => 1,
        Some('k') | Some('K') => 1024,
        Some('m') | Some('M') => 1024 * 1024,
        Some('g') | Some('G') => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(match mul {
        1 => s.parse::<goff>().ok()?,
        m => m * s[0..s.len() - 1].parse::<goff>().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("8K"), Some(8 * 1024));
        assert_eq!(parse_size("2m"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("1T"), None);
        assert_eq!(parse_size("xM"), None);
    }

    #[test]
    fn arguments() {
        let args = parse(&["kernel", "-m", "16M", "-t", "5000", "-l", "Error|KernPTEs"]).unwrap();
        assert_eq!(args.kmem, 16 * 1024 * 1024);
        assert_eq!(args.upcall_timeout, Some(5000));
        assert_eq!(args.log, LogFlags::Error | LogFlags::KernPTEs);

        assert_eq!(parse(&["kernel"]).unwrap(), Args::default());
        assert_eq!(parse(&["kernel", "-m"]), Err(Error::new(Code::InvArgs)));
        assert_eq!(parse(&["kernel", "-x"]), Err(Error::new(Code::InvArgs)));
        assert_eq!(parse(&["kernel", "-m", "0"]), Err(Error::new(Code::InvArgs)));
    }
}
