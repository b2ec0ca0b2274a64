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

use base::cell::RefCell;
use base::col::{Vec, VecDeque};
use base::errors::{Code, Error};
use base::rc::Rc;
use base::tcu::{EpId, Label, Message, PEId};

use thread::{Event, ThreadManager};

use crate::ktcu::{KTcu, KSRV_EP};

struct Entry {
    id: u64,
    rep: EpId,
    lbl: Label,
    msg: Vec<u64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum QState {
    Idle,
    Waiting,
    Aborted,
}

/// The messages to one tile, of which at most one is in flight
///
/// Every message gets its own event, which is notified with the reply once it arrived. Replies
/// carry the PE id as label, so that they can be routed back to the queue.
pub struct SendQueue {
    pe: PEId,
    next_id: u64,
    queue: VecDeque<Entry>,
    cur_event: Event,
    state: QState,
    threads: Rc<RefCell<ThreadManager>>,
}

fn get_event(pe: PEId, id: u64) -> Event {
    0x8000_0000_0000_0000 | ((pe as Event) << 32) | id
}

impl SendQueue {
    pub fn new(pe: PEId, threads: Rc<RefCell<ThreadManager>>) -> Self {
        SendQueue {
            pe,
            next_id: 0,
            queue: VecDeque::new(),
            cur_event: 0,
            state: QState::Idle,
            threads,
        }
    }

    pub fn pe(&self) -> PEId {
        self.pe
    }

    /// Returns whether a message is in flight
    pub fn is_waiting(&self) -> bool {
        self.state == QState::Waiting
    }

    /// Returns the number of messages that wait for the in-flight message to be answered
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Sends `msg` to `rep` with label `lbl` or queues it, if a message is in flight
    ///
    /// Returns the event that is notified with the reply.
    pub fn send(
        &mut self,
        ktcu: &KTcu,
        rep: EpId,
        lbl: Label,
        msg: &[u64],
    ) -> Result<Event, Error> {
        klog!(SQUEUE, "SendQueue[{}]: trying to send msg", self.pe);

        if self.state == QState::Aborted {
            return Err(Error::new(Code::RecvGone));
        }

        self.next_id += 1;
        let id = self.next_id;

        if self.state == QState::Idle {
            return self.do_send(ktcu, rep, lbl, id, msg);
        }

        klog!(SQUEUE, "SendQueue[{}]: queuing msg", self.pe);

        self.queue.push_back(Entry {
            id,
            rep,
            lbl,
            msg: msg.to_vec(),
        });
        Ok(get_event(self.pe, id))
    }

    /// Hands the reply `msg` to the waiting thread and sends the next queued message
    pub fn received_reply(&mut self, ktcu: &KTcu, msg: &Message) {
        klog!(SQUEUE, "SendQueue[{}]: received reply", self.pe);

        assert!(self.state == QState::Waiting);
        self.state = QState::Idle;

        self.threads.borrow_mut().notify(self.cur_event, Some(msg));

        self.send_pending(ktcu);
    }

    /// Wakes up all waiting threads without a reply and refuses further messages
    pub fn abort(&mut self) {
        klog!(SQUEUE, "SendQueue[{}]: aborting", self.pe);

        let mut threads = self.threads.borrow_mut();
        if self.state == QState::Waiting {
            threads.notify(self.cur_event, None);
        }
        for e in self.queue.drain(..) {
            threads.notify(get_event(self.pe, e.id), None);
        }
        self.state = QState::Aborted;
    }

    fn send_pending(&mut self, ktcu: &KTcu) {
        while let Some(e) = self.queue.pop_front() {
            klog!(SQUEUE, "SendQueue[{}]: found pending message", self.pe);

            if self.do_send(ktcu, e.rep, e.lbl, e.id, &e.msg).is_ok() {
                break;
            }

            // nobody will ever answer that one
            self.threads
                .borrow_mut()
                .notify(get_event(self.pe, e.id), None);
        }
    }

    fn do_send(
        &mut self,
        ktcu: &KTcu,
        rep: EpId,
        lbl: Label,
        id: u64,
        msg: &[u64],
    ) -> Result<Event, Error> {
        klog!(SQUEUE, "SendQueue[{}]: sending msg", self.pe);

        self.cur_event = get_event(self.pe, id);
        self.state = QState::Waiting;

        if let Err(e) = ktcu.send_to(self.pe, rep, lbl, msg, self.pe as Label, KSRV_EP) {
            self.state = QState::Idle;
            return Err(e);
        }

        Ok(self.cur_event)
    }
}

impl Drop for SendQueue {
    fn drop(&mut self) {
        if self.state != QState::Aborted {
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base::boxed::Box;
    use base::tcu::PEXUP_REP;

    use crate::arch::Fabric;

    fn setup() -> (Fabric, KTcu, Rc<RefCell<ThreadManager>>) {
        let fabric = Fabric::new(0);
        fabric.add_tile(1, false);
        let ktcu = KTcu::new(Box::new(fabric.clone()));
        (fabric, ktcu, Rc::new(RefCell::new(ThreadManager::new())))
    }

    fn reply(data: u64) -> Message {
        Message {
            header: Default::default(),
            data: vec![data],
        }
    }

    #[test]
    fn one_in_flight() {
        let (fabric, ktcu, threads) = setup();
        let mut sq = SendQueue::new(1, threads.clone());

        let ev1 = sq.send(&ktcu, PEXUP_REP, 0, &[1]).unwrap();
        let ev2 = sq.send(&ktcu, PEXUP_REP, 0, &[2]).unwrap();
        assert_ne!(ev1, ev2);
        assert!(sq.is_waiting());
        assert_eq!(sq.pending(), 1);
        assert_eq!(fabric.inbox(1).len(), 1);

        let t1 = threads.borrow_mut().subscribe(ev1);
        let t2 = threads.borrow_mut().subscribe(ev2);

        sq.received_reply(&ktcu, &reply(10));
        // the second message is on its way now
        assert_eq!(fabric.inbox(1).len(), 2);
        assert_eq!(fabric.inbox(1)[1].data, vec![2]);
        assert_eq!(fabric.inbox(1)[1].header.reply_label, 1);
        assert_eq!(threads.borrow_mut().fetch_msg(t1), Some(reply(10)));
        assert!(!threads.borrow().is_woken(t2));

        sq.received_reply(&ktcu, &reply(20));
        assert!(!sq.is_waiting());
        assert_eq!(threads.borrow_mut().fetch_msg(t2), Some(reply(20)));
    }

    #[test]
    fn abort_wakes_everybody() {
        let (_fabric, ktcu, threads) = setup();
        let mut sq = SendQueue::new(1, threads.clone());

        let ev1 = sq.send(&ktcu, PEXUP_REP, 0, &[1]).unwrap();
        let ev2 = sq.send(&ktcu, PEXUP_REP, 0, &[2]).unwrap();
        let t1 = threads.borrow_mut().subscribe(ev1);
        let t2 = threads.borrow_mut().subscribe(ev2);

        sq.abort();
        assert!(threads.borrow().is_woken(t1));
        assert!(threads.borrow().is_woken(t2));
        assert_eq!(threads.borrow_mut().fetch_msg(t1), None);
        assert_eq!(
            sq.send(&ktcu, PEXUP_REP, 0, &[3]).err(),
            Some(Error::new(Code::RecvGone))
        );
    }

    #[test]
    fn failed_send_keeps_queue_usable() {
        let (_fabric, ktcu, threads) = setup();
        // PE 7 does not exist
        let mut sq = SendQueue::new(7, threads);
        assert!(sq.send(&ktcu, PEXUP_REP, 0, &[1]).is_err());
        assert!(!sq.is_waiting());
    }
}
