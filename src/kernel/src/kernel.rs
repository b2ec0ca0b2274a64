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

//! The kernel's management of remote tiles
//!
//! The kernel configures the endpoints of other tiles, maintains the page tables of their VPEs
//! and talks to the multiplexer (PEMux) running on each tile. All of that happens remotely via the
//! kernel's TCU. The [`Kernel`] holds the state that is shared by these parts.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod log;

pub mod arch;
pub mod args;
pub mod aspace;
pub mod cap;
pub mod com;
pub mod epcfg;
pub mod ktcu;
pub mod mem;
pub mod pes;
pub mod platform;
pub mod workloop;

use base::boxed::Box;
use base::cell::{RefCell, RefMut};
use base::cfg;
use base::col::{BTreeMap, Vec};
use base::errors::{Code, Error};
use base::goff;
use base::io::log::Sink;
use base::rc::Rc;
use base::tcu::{Message, PEId};
use base::vec;

use thread::{Event, ThreadManager};

use crate::args::Args;
use crate::aspace::AddrSpaceMapper;
use crate::cap::RGateObject;
use crate::com::SendQueue;
use crate::epcfg::EpConfigurator;
use crate::ktcu::{HardwareBackend, KTcu, KPEX_EP, KSRV_EP};
use crate::mem::MainMemory;
use crate::pes::{PEMux, VPERegistry};
use crate::platform::Platform;

/// The kernel state
pub struct Kernel {
    args: Args,
    ktcu: KTcu,
    platform: Box<dyn Platform>,
    vpes: Rc<dyn VPERegistry>,
    mem: RefCell<MainMemory>,
    threads: Rc<RefCell<ThreadManager>>,
    pemuxes: BTreeMap<PEId, RefCell<PEMux>>,
    squeues: BTreeMap<PEId, Rc<RefCell<SendQueue>>>,
    // the receive buffers for the KSRV_EP and KPEX_EP
    _rbufs: Vec<u64>,
}

impl Kernel {
    /// Parses the arguments, enables the log and creates the kernel
    pub fn boot(
        argv: &[&str],
        backend: Box<dyn HardwareBackend>,
        platform: Box<dyn Platform>,
        vpes: Rc<dyn VPERegistry>,
        sink: Sink,
    ) -> Result<Self, Error> {
        let args = args::parse(argv)?;
        log::init(platform.kernel_pe(), args.log, sink);
        klog!(DEF, "Booting with {:?}", args);
        Self::new(args, backend, platform, vpes)
    }

    /// Creates the kernel and initializes the multiplexers of all tiles that run one
    pub fn new(
        args: Args,
        backend: Box<dyn HardwareBackend>,
        platform: Box<dyn Platform>,
        vpes: Rc<dyn VPERegistry>,
    ) -> Result<Self, Error> {
        let ktcu = KTcu::new(backend);

        // both buffers hold KSRV_RBUF_SLOTS messages of 2^KSRV_RBUF_ORD bytes
        let ord = cfg::KSRV_RBUF_ORD + cfg::KSRV_RBUF_SLOTS.trailing_zeros();
        let buf_words = (1 << ord) / 8;
        let rbufs = vec![0u64; buf_words * 2];
        let buf = rbufs.as_ptr() as goff;
        ktcu.recv_msgs(KSRV_EP, buf, ord, cfg::KSRV_RBUF_ORD);
        ktcu.recv_msgs(KPEX_EP, buf + (buf_words * 8) as goff, ord, cfg::KSRV_RBUF_ORD);

        let mem = MainMemory::from_platform(&*platform, args.kmem);
        klog!(MEM, "{:?}", mem);

        let threads = Rc::new(RefCell::new(ThreadManager::new()));
        let mut pemuxes = BTreeMap::new();
        let mut squeues = BTreeMap::new();
        for pe in platform.pes() {
            if platform.pe_desc(pe).is_mem() || pe == platform.kernel_pe() {
                continue;
            }
            let queue = Rc::new(RefCell::new(SendQueue::new(pe, threads.clone())));
            pemuxes.insert(pe, RefCell::new(PEMux::new(pe, queue.clone())));
            squeues.insert(pe, queue);
        }

        let kern = Kernel {
            args,
            ktcu,
            platform,
            vpes,
            mem: RefCell::new(mem),
            threads,
            pemuxes,
            squeues,
            _rbufs: rbufs,
        };

        for pemux in kern.pemuxes.values() {
            pemux.borrow_mut().init(&kern)?;
        }

        Ok(kern)
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn ktcu(&self) -> &KTcu {
        &self.ktcu
    }

    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    pub fn vpes(&self) -> &dyn VPERegistry {
        &*self.vpes
    }

    pub fn mem(&self) -> &RefCell<MainMemory> {
        &self.mem
    }

    pub fn threads(&self) -> &RefCell<ThreadManager> {
        &self.threads
    }

    /// Returns the PEMux of `pe`
    ///
    /// Panics if `pe` is unknown or its PEMux is already borrowed.
    pub fn pemux(&self, pe: PEId) -> RefMut<'_, PEMux> {
        match self.pemuxes.get(&pe) {
            Some(p) => p.borrow_mut(),
            None => panic!("PE{} has no PEMux", pe),
        }
    }

    pub fn try_pemux(&self, pe: PEId) -> Option<&RefCell<PEMux>> {
        self.pemuxes.get(&pe)
    }

    pub fn squeue(&self, pe: PEId) -> Option<&Rc<RefCell<SendQueue>>> {
        self.squeues.get(&pe)
    }

    pub fn epcfg(&self) -> EpConfigurator<'_> {
        EpConfigurator::new(&self.ktcu, &*self.platform, &self.threads)
    }

    pub fn aspace(&self) -> AddrSpaceMapper<'_> {
        AddrSpaceMapper::new(self)
    }

    /// Creates a receive gate with `2^order` bytes and `2^msg_order` bytes per message
    pub fn new_rgate(&self, order: u32, msg_order: u32) -> Result<Rc<RGateObject>, Error> {
        if msg_order > order || order >= 32 {
            return Err(Error::new(Code::InvArgs));
        }
        let event = self.threads.borrow_mut().alloc_event();
        Ok(RGateObject::new(order, msg_order, event))
    }

    /// Waits until `event` is notified, while handling the replies from the multiplexers
    ///
    /// Fails with [`Code::Timeout`] if the configured upcall timeout has passed.
    pub fn wait_for(&self, event: Event) -> Result<Option<Message>, Error> {
        thread::wait_for(
            &self.threads,
            event,
            self.args.upcall_timeout,
            || self.ktcu.nanotime(),
            || {
                workloop::poll_replies(self);
                Ok(())
            },
        )
    }

    /// Aborts the send queue of `pe`, waking up everybody that waits for a reply from it
    pub fn abort_pe(&self, pe: PEId) {
        if let Some(q) = self.squeues.get(&pe) {
            q.borrow_mut().abort();
        }
    }
}
