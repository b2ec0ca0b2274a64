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

//! Cooperative threads that block on events
//!
//! The kernel runs its work loop on a single core. A logical thread that needs to wait for
//! something (a reply from a multiplexer, a receive gate becoming ready, ...) subscribes to an
//! event and keeps driving the work loop until the event is notified. The `ThreadManager`
//! bookkeeps the blocked threads, wakes them on `notify` and hands over the message that came
//! with the notification.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;

use base::cell::RefCell;
use base::col::Vec;
use base::errors::{Code, Error};
use base::io::LogFlags;
use base::log;
use base::tcu::Message;

/// The identifier of an event that threads can wait for
pub type Event = u64;

/// The identifier of a thread
pub type ThreadId = u32;

bitflags! {
    /// The state of a thread
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct ThreadFlags : u8 {
        /// The event has been notified
        const WOKEN     = 1 << 0;
        /// The notification carried a message
        const HAS_MSG   = 1 << 1;
    }
}

struct Thread {
    id: ThreadId,
    event: Event,
    flags: ThreadFlags,
    msg: Option<Message>,
}

impl Thread {
    fn trigger_event(&mut self, event: Event, msg: Option<&Message>) -> bool {
        if self.event != event || self.flags.contains(ThreadFlags::WOKEN) {
            return false;
        }

        self.flags.insert(ThreadFlags::WOKEN);
        if let Some(m) = msg {
            self.flags.insert(ThreadFlags::HAS_MSG);
            self.msg = Some(m.clone());
        }
        true
    }
}

/// Manages the threads that are blocked on events
#[derive(Default)]
pub struct ThreadManager {
    next_id: ThreadId,
    next_event: Event,
    block: Vec<Thread>,
}

impl ThreadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new event, different from all events allocated so far
    pub fn alloc_event(&mut self) -> Event {
        self.next_event += 1;
        self.next_event
    }

    /// Blocks a new thread on `event` and returns its id
    pub fn subscribe(&mut self, event: Event) -> ThreadId {
        assert!(event != 0);
        self.next_id += 1;
        self.block.push(Thread {
            id: self.next_id,
            event,
            flags: ThreadFlags::empty(),
            msg: None,
        });
        log!(
            LogFlags::LibThread,
            "Thread {} waits for event {:#x}",
            self.next_id,
            event
        );
        self.next_id
    }

    /// Wakes up all threads that wait for `event` and gives them a copy of `msg`
    ///
    /// Returns the number of woken threads.
    pub fn notify(&mut self, event: Event, msg: Option<&Message>) -> usize {
        let mut count = 0;
        for t in &mut self.block {
            if t.trigger_event(event, msg) {
                log!(LogFlags::LibThread, "Waking up thread {} for event {:#x}", t.id, event);
                count += 1;
            }
        }
        count
    }

    /// Returns whether the given thread has been woken up
    pub fn is_woken(&self, id: ThreadId) -> bool {
        self.block
            .iter()
            .any(|t| t.id == id && t.flags.contains(ThreadFlags::WOKEN))
    }

    /// Removes the given thread and returns the message it has been woken up with
    pub fn fetch_msg(&mut self, id: ThreadId) -> Option<Message> {
        let idx = self.block.iter().position(|t| t.id == id)?;
        let t = self.block.remove(idx);
        match t.flags.contains(ThreadFlags::HAS_MSG) {
            true => t.msg,
            false => None,
        }
    }

    /// Removes the given thread without waiting any longer
    pub fn cancel(&mut self, id: ThreadId) {
        self.block.retain(|t| t.id != id);
    }

    /// Returns the number of threads that still wait for their event
    pub fn blocked_count(&self) -> usize {
        self.block
            .iter()
            .filter(|t| !t.flags.contains(ThreadFlags::WOKEN))
            .count()
    }
}

/// Blocks the current logical thread on `event` until it has been notified
///
/// While waiting, `poll` is called repeatedly to make progress (e.g., to fetch replies and notify
/// the corresponding events). If `timeout` nanoseconds according to `now` have passed without a
/// notification, the wait is aborted with [`Code::Timeout`]. Errors of `poll` abort the wait as
/// well.
///
/// Returns the message that came with the notification, if any.
pub fn wait_for<N, P>(
    tmng: &RefCell<ThreadManager>,
    event: Event,
    timeout: Option<u64>,
    now: N,
    mut poll: P,
) -> Result<Option<Message>, Error>
where
    N: Fn() -> u64,
    P: FnMut() -> Result<(), Error>,
{
    let id = tmng.borrow_mut().subscribe(event);
    let deadline = timeout.map(|t| now().saturating_add(t));

    loop {
        if tmng.borrow().is_woken(id) {
            return Ok(tmng.borrow_mut().fetch_msg(id));
        }

        if let Some(end) = deadline {
            if now() >= end {
                tmng.borrow_mut().cancel(id);
                return Err(Error::new(Code::Timeout));
            }
        }

        if let Err(e) = poll() {
            tmng.borrow_mut().cancel(id);
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base::tcu::Header;
    use std::cell::Cell;

    fn msg(label: u64) -> Message {
        Message {
            header: Header {
                label,
                ..Header::default()
            },
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn notify_wakes_all_waiters() {
        let mut tm = ThreadManager::new();
        let ev = tm.alloc_event();
        let other = tm.alloc_event();
        assert_ne!(ev, other);

        let t1 = tm.subscribe(ev);
        let t2 = tm.subscribe(ev);
        let t3 = tm.subscribe(other);
        assert_eq!(tm.notify(ev, Some(&msg(5))), 2);
        assert!(tm.is_woken(t1) && tm.is_woken(t2));
        assert!(!tm.is_woken(t3));
        assert_eq!(tm.blocked_count(), 1);

        assert_eq!(tm.fetch_msg(t1), Some(msg(5)));
        assert_eq!(tm.fetch_msg(t1), None);
        // notifying again does not touch already woken threads
        assert_eq!(tm.notify(ev, None), 0);
        assert_eq!(tm.fetch_msg(t2), Some(msg(5)));
    }

    #[test]
    fn wait_until_notified() {
        let tm = RefCell::new(ThreadManager::new());
        let ev = tm.borrow_mut().alloc_event();
        let polls = Cell::new(0);

        let res = wait_for(&tm, ev, None, || 0, || {
            polls.set(polls.get() + 1);
            if polls.get() == 3 {
                tm.borrow_mut().notify(ev, Some(&msg(9)));
            }
            Ok(())
        });
        assert_eq!(res, Ok(Some(msg(9))));
        assert_eq!(polls.get(), 3);
        assert_eq!(tm.borrow().blocked_count(), 0);
    }

    #[test]
    fn wait_times_out() {
        let tm = RefCell::new(ThreadManager::new());
        let ev = tm.borrow_mut().alloc_event();
        let time = Cell::new(0);

        let res = wait_for(&tm, ev, Some(100), || time.get(), || {
            time.set(time.get() + 30);
            Ok(())
        });
        assert_eq!(res, Err(Error::new(Code::Timeout)));
        assert_eq!(time.get(), 120);
        assert_eq!(tm.borrow().blocked_count(), 0);
    }

    #[test]
    fn poll_errors_abort() {
        let tm = RefCell::new(ThreadManager::new());
        let ev = tm.borrow_mut().alloc_event();
        let res = wait_for(&tm, ev, None, || 0, || Err(Error::new(Code::RecvGone)));
        assert_eq!(res, Err(Error::new(Code::RecvGone)));
        assert_eq!(tm.borrow_mut().fetch_msg(1), None);
    }
}
