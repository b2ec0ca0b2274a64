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

//! Contains the logger

use core::cmp;
use core::fmt;

use crate::cell::{RefMut, StaticCell, StaticRefCell};
use crate::io::LogFlags;
use crate::tcu::PEId;

const MAX_LINE_LEN: usize = 180;
const SUFFIX: &[u8] = b"\x1B[0m";

/// The function that receives every completed log line
pub type Sink = fn(&[u8]);

static LOG_READY: StaticCell<bool> = StaticCell::new(false);
static LOG: StaticRefCell<Log> = StaticRefCell::new(Log::new(discard));

fn discard(_line: &[u8]) {
}

/// A buffered logger that hands out complete lines to a sink
pub struct Log {
    sink: Sink,
    flags: LogFlags,
    buf: [u8; MAX_LINE_LEN],
    pos: usize,
    start_pos: usize,
}

impl Log {
    /// Returns the logger, if it has been initialized
    pub fn get() -> Option<RefMut<'static, Log>> {
        match LOG_READY.get() {
            true => Some(LOG.borrow_mut()),
            false => None,
        }
    }

    /// Creates a new logger with only `Info` and `Error` enabled
    pub const fn new(sink: Sink) -> Self {
        Log {
            sink,
            flags: LogFlags::Info.union(LogFlags::Error),
            buf: [0; MAX_LINE_LEN],
            pos: 0,
            start_pos: 0,
        }
    }

    /// Returns the enabled log flags
    pub fn flags(&self) -> LogFlags {
        self.flags
    }

    /// Sets the enabled log flags
    pub fn set_flags(&mut self, flags: LogFlags) {
        self.flags = flags;
    }

    /// Sets the line prefix based on the given PE id and name
    pub fn init(&mut self, pe: PEId, name: &str) {
        let colors = ["31", "32", "33", "34", "35", "36"];
        let begin = match name.rfind('/') {
            Some(b) => b + 1,
            None => 0,
        };
        let len = cmp::min(name.len() - begin, 8);

        self.pos = 0;
        let _ = fmt::Write::write_fmt(
            self,
            format_args!(
                "\x1B[0;{}m[PE{:X}:{:<8}] ",
                colors[(pe as usize) % colors.len()],
                pe,
                &name[begin..begin + len]
            ),
        );
        self.start_pos = self.pos;
    }

    fn put_char(&mut self, c: u8) {
        self.buf[self.pos] = c;
        self.pos += 1;

        if c == b'\n' || self.pos + SUFFIX.len() + 1 >= MAX_LINE_LEN {
            for c in SUFFIX {
                self.buf[self.pos] = *c;
                self.pos += 1;
            }
            if c != b'\n' {
                self.buf[self.pos] = b'\n';
                self.pos += 1;
            }

            self.flush();
        }
    }

    fn flush(&mut self) {
        (self.sink)(&self.buf[0..self.pos]);
        self.pos = self.start_pos;
    }
}

impl fmt::Write for Log {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.put_char(b);
        }
        Ok(())
    }
}

/// Initializes the global logger
pub fn init(pe: PEId, name: &str, flags: LogFlags, sink: Sink) {
    {
        let mut log = LOG.borrow_mut();
        log.sink = sink;
        log.set_flags(flags);
        log.init(pe, name);
    }
    LOG_READY.set(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::fmt::Write;
    use std::string::String;
    use std::sync::Mutex;
    use std::vec::Vec;

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn collect(line: &[u8]) {
        LINES
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(line).into_owned());
    }

    #[test]
    fn prefix_and_lines() {
        let mut log = Log::new(collect);
        log.init(3, "kernel/pekernel");
        write!(log, "hello {}\nworld\n", 42).unwrap();

        let lines = LINES.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "\x1B[0;34m[PE3:pekernel] hello 42\n\x1B[0m");
        assert!(lines[1].ends_with("world\n\x1B[0m"));
    }
}
