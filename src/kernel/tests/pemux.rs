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

mod common;

use base::cfg;
use base::errors::{Code, Error};
use base::kif::{self, pemux, Perm};
use base::mem::GlobAddr;
use base::serialize;
use base::tcu::{self, EpType, TCU};

use pekernel::cap::SGateObject;
use pekernel::ktcu::KPEX_EP;
use pekernel::pes::State;
use pekernel::workloop;

use common::*;

#[test]
fn init_configures_pemux_eps() {
    let env = setup(None);

    for pe in [VM_PE, SPM_PE] {
        let sep = env.fabric.ep_regs(pe, tcu::KPEX_SEP);
        assert_eq!(TCU::unpack_send_regs(&sep), Some((KERNEL_PE, KPEX_EP)));
        assert_eq!(TCU::ep_vpe(&sep), pemux::VPE_ID);
        // the label identifies the tile
        assert_eq!(sep[2], pe as u64);

        let rep = env.fabric.ep_regs(pe, tcu::KPEX_REP);
        assert_eq!(TCU::ep_type(&rep), EpType::Receive);
        assert_eq!(TCU::unpack_recv_regs(&rep).unwrap().0, None);

        let upcall = env.fabric.ep_regs(pe, tcu::PEXUP_REP);
        assert_eq!(
            TCU::unpack_recv_regs(&upcall).unwrap().0,
            Some(tcu::PEXUP_RPLEP)
        );
    }

    // neither the kernel's tile nor memory tiles run a multiplexer
    assert!(env.kern.try_pemux(KERNEL_PE).is_none());
    assert!(env.kern.try_pemux(MEM_PE).is_none());
}

#[test]
fn upcall_is_answered() {
    let env = setup(None);
    env.answer_upcalls(VM_PE, Code::Success, 0);

    env.kern
        .pemux(VM_PE)
        .vpe_ctrl(&env.kern, 5, 16, pemux::VPEOp::Start)
        .unwrap();

    let inbox = env.fabric.inbox(VM_PE);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].header.reply_label, VM_PE as u64);
    let req = serialize::from_words::<pemux::VPECtrl>(&inbox[0].data).unwrap();
    assert_eq!(req, pemux::VPECtrl {
        op: pemux::Upcalls::VPECtrl,
        vpe_sel: 5,
        vpe_op: pemux::VPEOp::Start,
        eps_start: 16,
    });
    assert!(!env.kern.squeue(VM_PE).unwrap().borrow().is_waiting());
}

#[test]
fn upcall_errors_are_returned() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.answer_upcalls(VM_PE, Code::NoPerm, 0);

    let res = env.kern.pemux(VM_PE).map(
        &env.kern,
        5,
        0x1000,
        GlobAddr::new_with(MEM_PE, 0x2000),
        1,
        Perm::R,
    );
    assert_eq!(res, Err(Error::new(Code::NoPerm)));
}

#[test]
fn no_upcalls_for_dead_vpes() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Dead);

    let res = env.kern.pemux(VM_PE).unmap(&env.kern, 5, 0x1000, 1);
    assert_eq!(res, Err(Error::new(Code::VPEGone)));
    let res = env.kern.pemux(VM_PE).unmap(&env.kern, 6, 0x1000, 1);
    assert_eq!(res, Err(Error::new(Code::VPEGone)));
    assert!(env.fabric.inbox(VM_PE).is_empty());
}

#[test]
fn translate() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    let phys = GlobAddr::new_with(MEM_PE, 0x4_3000);
    env.answer_upcalls(VM_PE, Code::Success, phys.raw() | 0x3);

    let res = env
        .kern
        .pemux(VM_PE)
        .translate(&env.kern, 5, 0x8000, Perm::RW);
    assert_eq!(res, Ok(phys));

    let req = serialize::from_words::<pemux::Translate>(&env.fabric.inbox(VM_PE)[0].data).unwrap();
    assert_eq!(req.virt, 0x8000);
    assert_eq!(req.perm, Perm::RW);
}

#[test]
#[should_panic]
fn unanswered_upcall_is_fatal() {
    let env = setup(Some(100_000));
    env.kern
        .pemux(VM_PE)
        .vpe_ctrl(&env.kern, 5, 16, pemux::VPEOp::Stop)
        .ok();
}

#[test]
fn invalidation_removes_unread_messages() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.answer_upcalls(VM_PE, Code::Success, 0);

    // without unread messages, the multiplexer is not involved
    env.kern
        .pemux(VM_PE)
        .invalidate_ep(&env.kern, 5, 20, false)
        .unwrap();
    assert!(env.fabric.inbox(VM_PE).is_empty());

    env.fabric.set_unread(VM_PE, 21, 0b101);
    env.kern
        .pemux(VM_PE)
        .invalidate_ep(&env.kern, 5, 21, true)
        .unwrap();
    assert_eq!(env.fabric.inv_eps(VM_PE), vec![20, 21]);

    let inbox = env.fabric.inbox(VM_PE);
    assert_eq!(inbox.len(), 1);
    let req = serialize::from_words::<pemux::RemMsgs>(&inbox[0].data).unwrap();
    assert_eq!(req.unread_mask, 0b101);
    assert_eq!(req.vpe_sel, 5);
}

#[test]
fn invalidation_for_dead_vpe() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Dead);
    env.fabric.set_unread(VM_PE, 21, 0b1);

    env.kern
        .pemux(VM_PE)
        .invalidate_ep(&env.kern, 5, 21, true)
        .unwrap();
    assert!(env.fabric.inbox(VM_PE).is_empty());
}

#[test]
fn failed_invalidation() {
    let env = setup(None);
    env.fabric.inject_ext_error(VM_PE, Code::NoPerm);
    assert_eq!(
        env.kern.pemux(VM_PE).invalidate_ep(&env.kern, 5, 21, false),
        Err(Error::new(Code::NoPerm))
    );
}

#[test]
fn reply_eps_of_sender_are_invalidated() {
    let env = setup(None);

    // four slots with reply EPs 24..27; slots 0 and 2 hold unanswered messages
    let mut regs = [0; tcu::EP_REGS];
    TCU::config_recv(&mut regs, 1, 0x1000, 8, 6, Some(24));
    regs[2] = 0b0101;
    env.fabric.set_ep_regs(SPM_PE, 20, regs);

    let reply_ep = |sender_ep| {
        let mut regs = [0; tcu::EP_REGS];
        TCU::config_reply(&mut regs, 1, 0, VM_PE, 30, 6, sender_ep);
        regs
    };
    env.fabric.set_ep_regs(SPM_PE, 24, reply_ep(17));
    env.fabric.set_ep_regs(SPM_PE, 25, reply_ep(17));
    env.fabric.set_ep_regs(SPM_PE, 26, reply_ep(18));

    let before = env.fabric.inv_eps(SPM_PE).len();
    env.kern
        .pemux(VM_PE)
        .invalidate_reply_eps(&env.kern, SPM_PE, 20, 17)
        .unwrap();

    // EP 25 belongs to a free slot and EP 26 replies to another sender
    assert_eq!(env.fabric.inv_eps(SPM_PE)[before..], [24]);
}

#[test]
fn notification_does_not_wait() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);

    env.kern
        .pemux(VM_PE)
        .notify_invalidate(&env.kern, 5, 22)
        .unwrap();
    let req = serialize::from_words::<pemux::EpInval>(&env.fabric.inbox(VM_PE)[0].data).unwrap();
    assert_eq!(req.ep, 22);
    assert!(env.kern.squeue(VM_PE).unwrap().borrow().is_waiting());
}

#[test]
fn aborted_queue_fails_upcalls() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.kern.abort_pe(VM_PE);

    assert_eq!(
        env.kern.pemux(VM_PE).notify_invalidate(&env.kern, 5, 22),
        Err(Error::new(Code::RecvGone))
    );
}

#[test]
fn exit_call() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);
    env.kern.pemux(VM_PE).add_vpe(5);

    let exit = pemux::Exit {
        op: pemux::Calls::Exit,
        vpe_sel: 5,
        code: 3,
    };
    env.fabric
        .call_kernel(VM_PE, serialize::to_words(&exit).unwrap());
    assert_eq!(workloop::poll_calls(&env.kern), Ok(1));

    assert_eq!(env.vpes.exit_code(5), Some(3));
    let replies = env.fabric.replies(VM_PE);
    assert_eq!(replies.len(), 1);
    let reply = serialize::from_words::<kif::DefaultReply>(&replies[0]).unwrap();
    assert_eq!(reply.error, Code::Success);
}

#[test]
fn exit_of_foreign_vpe() {
    let env = setup(None);
    env.add_vpe(5, VM_PE, State::Running);

    let exit = pemux::Exit {
        op: pemux::Calls::Exit,
        vpe_sel: 5,
        code: 1,
    };
    env.fabric
        .call_kernel(VM_PE, serialize::to_words(&exit).unwrap());
    workloop::poll_calls(&env.kern).unwrap();

    // VPE 5 does not run on that tile
    assert_eq!(env.vpes.exit_code(5), None);
    assert_eq!(env.fabric.replies(VM_PE).len(), 1);
}

#[test]
fn malformed_call() {
    let env = setup(None);
    env.fabric.call_kernel(SPM_PE, vec![]);
    workloop::poll_calls(&env.kern).unwrap();

    let replies = env.fabric.replies(SPM_PE);
    let reply = serialize::from_words::<kif::DefaultReply>(&replies[0]).unwrap();
    assert_ne!(reply.error, Code::Success);
}

#[test]
fn receive_buffer_placement() {
    let env = setup(None);
    let rgate = env.kern.new_rgate(8, 6).unwrap();
    let mut pm = env.kern.pemux(VM_PE);
    let start = cfg::RECVBUF_SPACE;

    // the multiplexer's own buffers come first
    assert_eq!(
        pm.config_rcv_ep(&env.kern, 20, 5, None, &rgate, start),
        Err(Error::new(Code::InvArgs))
    );
    // beyond the end of the receive buffer space
    assert_eq!(
        pm.config_rcv_ep(&env.kern, 20, 5, None, &rgate, start + cfg::RECVBUF_SIZE - 0x80),
        Err(Error::new(Code::InvArgs))
    );

    let reserved = pm.reserve_rbufs(&env.kern, 0x200).unwrap();
    assert_eq!(reserved, start + cfg::KPEX_RBUF_SIZE + cfg::PEXUP_RBUF_SIZE);
    assert_eq!(
        pm.config_rcv_ep(&env.kern, 20, 5, Some(30), &rgate, reserved),
        Err(Error::new(Code::InvArgs))
    );

    pm.config_rcv_ep(&env.kern, 20, 5, Some(30), &rgate, reserved + 0x200)
        .unwrap();
    assert_eq!(rgate.location(), Some((VM_PE, 20)));
    assert_eq!(rgate.addr(), reserved + 0x200);

    let regs = env.fabric.ep_regs(VM_PE, 20);
    assert_eq!(TCU::ep_type(&regs), EpType::Receive);
    // the tile is shared, so that the EP belongs to the VPE
    assert_eq!(TCU::ep_vpe(&regs), 5);

    assert_eq!(
        pm.reserve_rbufs(&env.kern, cfg::RECVBUF_SIZE),
        Err(Error::new(Code::NoSpace))
    );
}

#[test]
fn send_gates_are_installed_once() {
    let env = setup(None);
    let rgate = env.kern.new_rgate(8, 6).unwrap();
    let sgate = SGateObject::new(&rgate, 0x1234, 2);
    let mut pm = env.kern.pemux(SPM_PE);

    // the receive gate is not installed yet
    assert_eq!(
        pm.config_snd_ep(&env.kern, 20, 6, &sgate),
        Err(Error::new(Code::InvArgs))
    );

    let region = env.kern.platform().def_recvbuf(SPM_PE).unwrap();
    let addr = region.start + cfg::KPEX_RBUF_SIZE + cfg::PEXUP_RBUF_SIZE;
    pm.config_rcv_ep(&env.kern, 21, 6, None, &rgate, addr)
        .unwrap();

    pm.config_snd_ep(&env.kern, 20, 6, &sgate).unwrap();
    let regs = env.fabric.ep_regs(SPM_PE, 20);
    assert_eq!(TCU::unpack_send_regs(&regs), Some((SPM_PE, 21)));
    assert_eq!(regs[2], 0x1234);
    // not shared
    assert_eq!(TCU::ep_vpe(&regs), tcu::INVALID_VPE);

    assert_eq!(
        pm.config_snd_ep(&env.kern, 22, 6, &sgate),
        Err(Error::new(Code::Exists))
    );
}
