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

use base::errors::Error;
use base::tcu::PEId;

use crate::ktcu::{KPEX_EP, KSRV_EP};
use crate::Kernel;

/// Hands all replies from the multiplexers to the send queues they belong to
///
/// Returns the number of handled replies.
pub fn poll_replies(kern: &Kernel) -> usize {
    let mut count = 0;
    while let Some(msg) = kern.ktcu().fetch_msg(KSRV_EP) {
        // the label of replies is the PE id of the send queue
        let pe = msg.header.label as PEId;
        match kern.squeue(pe) {
            Some(q) => q.borrow_mut().received_reply(kern.ktcu(), &msg),
            None => klog!(ERR, "Dropping reply with unknown label {:#x}", msg.header.label),
        }
        count += 1;
    }
    count
}

/// Handles all pending calls from the multiplexers
///
/// Returns the number of handled calls.
pub fn poll_calls(kern: &Kernel) -> Result<usize, Error> {
    let mut count = 0;
    while let Some(msg) = kern.ktcu().fetch_msg(KPEX_EP) {
        let pe = msg.header.label as PEId;
        match kern.try_pemux(pe) {
            Some(p) => p.borrow_mut().handle_call(kern, &msg)?,
            None => klog!(ERR, "Dropping call from unknown PE{}", pe),
        }
        count += 1;
    }
    Ok(count)
}

/// Handles replies and calls until `stop` returns true
pub fn workloop<F>(kern: &Kernel, stop: F) -> Result<(), Error>
where
    F: Fn(&Kernel) -> bool,
{
    while !stop(kern) {
        poll_replies(kern);
        poll_calls(kern)?;
    }
    Ok(())
}
