/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! End-to-end tests: a scripted gdb client against a full session serving
//! the in-memory target.

mod common;

use common::*;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use remora::commands::ResumeAction;
use remora::testing::TRAP;
use remora::Ptid;
use remora::StopEvent;
use remora::StopKind;
use remora::StubConfig;

fn actions(target: &remora::testing::FakeTarget) -> Vec<ResumeAction> {
    target.resumes().iter().map(|r| r.action).collect()
}

#[tokio::test]
async fn handshake_and_queries() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        let features = gdb.handshake().await;
        assert!(features.starts_with("PacketSize=4000;"), "{}", features);
        for feature in [
            "swbreak+",
            "multiprocess+",
            "QStartNoAckMode+",
            "QNonStop+",
            "fork-events+",
            "qXfer:features:read+",
            "ConditionalBreakpoints+",
            "BreakpointCommands+",
        ] {
            assert!(features.contains(feature), "{} missing in {}", feature, features);
        }
        gdb.start_no_ack_mode().await;

        assert_eq!(gdb.request("qC").await, "QCp64.64");
        assert_eq!(gdb.request("qfThreadInfo").await, "mp64.64");
        assert_eq!(gdb.request("qsThreadInfo").await, "l");
        assert_eq!(gdb.request("qAttached").await, "0");
        assert_eq!(gdb.request("qTStatus").await, "");
        assert_eq!(gdb.request("vCont?").await, "vCont;c;C;s;S;t;r");
        assert_eq!(gdb.request("Hgp64.64").await, "OK");
        assert_eq!(gdb.request("Hgp64.65").await, "E01");
        assert_eq!(gdb.request("Tp64.64").await, "OK");
        assert_eq!(gdb.request("Tp64.99").await, "E01");

        let stop = gdb.request("?").await;
        assert!(stop.starts_with("T05"), "{}", stop);
        assert!(stop.contains("10:8010000000000000;"), "{}", stop);
        assert!(stop.ends_with("thread:p64.64;"), "{}", stop);
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn registers_are_written_back_before_resuming() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("p10").await, "8010000000000000");
        assert_eq!(gdb.request("P10=0020000000000000").await, "OK");
        assert_eq!(gdb.request("p10").await, "0020000000000000");
        assert_eq!(gdb.request("p400").await, "E01");

        let regs = gdb.request("g").await;
        assert_eq!(&regs[256..272], "0020000000000000");
        assert_eq!(t.register_stores(), 0);

        gdb.send("vCont;c").await;
        gdb.interrupt().await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T02"), "{}", stop);
        assert_eq!(t.register(main_thread(), RIP), Some(0x2000));
        assert_eq!(t.register_stores(), 1);
        assert_eq!(t.interrupts(), 1);
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn target_description() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        let chunk = gdb.request("qXfer:features:read:target.xml:0,20").await;
        assert!(chunk.starts_with("m<?xml version"), "{}", chunk);
        assert_eq!(chunk.len(), 0x21);
        assert_eq!(
            gdb.request("qXfer:features:read:target.xml:100000,20").await,
            "l"
        );
        assert_eq!(
            gdb.request("qXfer:features:read:other.xml:0,20").await,
            "E00"
        );
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn breakpoints_are_hidden_from_memory_accesses() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("Z0,1000,1").await, "OK");
        assert_eq!(t.peek(CODE, 1), vec![TRAP]);
        assert_eq!(gdb.request("m1000,4").await, "90909090");

        // Writes land under the breakpoint.
        assert_eq!(gdb.request("M1000,2:aabb").await, "OK");
        assert_eq!(t.peek(CODE, 2), vec![TRAP, 0xbb]);
        assert_eq!(gdb.request("m1000,2").await, "aabb");
        assert_eq!(gdb.request("X1004,1:A").await, "OK");
        assert_eq!(t.peek(CODE + 4, 1), vec![b'A']);

        // A second insert is the same breakpoint.
        assert_eq!(gdb.request("Z0,1000,1").await, "OK");
        assert_eq!(gdb.request("z0,1000,1").await, "OK");
        assert_eq!(t.peek(CODE, 2), vec![0xaa, 0xbb]);
        assert_eq!(gdb.request("z0,1000,1").await, "E01");

        // Watchpoints need the target's help.
        assert_eq!(gdb.request("Z2,1000,4").await, "");
        t.support_hardware_points(true);
        assert_eq!(gdb.request("Z2,1000,4").await, "OK");
        assert_eq!(t.inserted_points(), 1);
        assert_eq!(gdb.request("z2,1000,4").await, "OK");
        assert_eq!(t.inserted_points(), 0);

        // Unmapped memory
        assert_eq!(gdb.request("m5000,4").await, "E05");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn breakpoint_hit_then_step_over() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("Z0,1010,1").await, "OK");

        gdb.send("vCont;c").await;
        hit_breakpoint(&t, &events, PID, 0x1010).await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T05swbreak:;"), "{}", stop);
        assert!(stop.contains("10:1010000000000000;"), "{}", stop);

        // Continuing steps off the breakpoint with it taken out first.
        gdb.send("c").await;
        gdb.interrupt().await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T02"), "{}", stop);
        assert_eq!(
            actions(&t),
            vec![
                ResumeAction::Continue(None),
                ResumeAction::Step(None),
                ResumeAction::Continue(None),
            ]
        );
        assert_eq!(t.peek(0x1010, 1), vec![TRAP]);
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn false_condition_is_not_reported() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        // const8 0; end
        let never = agent_expr(&[0x22, 0x00, 0x27]);
        assert_eq!(gdb.request(&format!("Z0,1010,1;{}", never)).await, "OK");

        gdb.send("vCont;c").await;
        hit_breakpoint(&t, &events, PID, 0x1010).await;
        gdb.interrupt().await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T02"), "{}", stop);
        assert!(actions(&t).contains(&ResumeAction::Step(None)));
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn failing_condition_reports_the_stop() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        // const8 1; const8 0; div_signed; end
        let divide_by_zero = agent_expr(&[0x22, 0x01, 0x22, 0x00, 0x05, 0x27]);
        assert_eq!(
            gdb.request(&format!("Z0,1010,1;{}", divide_by_zero)).await,
            "OK"
        );

        gdb.send("vCont;c").await;
        hit_breakpoint(&t, &events, PID, 0x1010).await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T05swbreak:;"), "{}", stop);
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn dprintf_prints_without_stopping() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        let cmds = agent_expr(&printf_seven());
        assert_eq!(
            gdb.request(&format!("Z0,1010,1;cmds:0,{}", cmds)).await,
            "OK"
        );

        gdb.send("vCont;c").await;
        hit_breakpoint(&t, &events, PID, 0x1010).await;
        assert_eq!(gdb.recv().await, format!("O{}", hex("v=7\n")));
        gdb.interrupt().await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T02"), "{}", stop);
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn packets_wait_for_the_stop_reply() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        gdb.send("vCont;c").await;

        // Memory reads are served while the inferior runs.
        assert_eq!(gdb.request("m1010,2").await, "9090");
        // Anything else waits for the stop.
        gdb.send("qC").await;
        hit_breakpoint(&t, &events, PID, 0x1010).await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T05"), "{}", stop);
        assert_eq!(gdb.recv().await, "QCp64.64");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn non_stop_notifications() {
    let threads = [PID, PID + 1];
    let target = fake_target(&threads);
    let result = with_session(StubConfig::default(), &target, &threads, |mut gdb, events| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("QNonStop:1").await, "OK");
        assert_eq!(gdb.request("vCont;c").await, "OK");

        events
            .send(StopEvent::new(main_thread(), StopKind::Signal(Signal::SIGUSR1)))
            .await
            .unwrap();
        events
            .send(StopEvent::new(
                Ptid::new(PID, PID + 1),
                StopKind::Signal(Signal::SIGINT),
            ))
            .await
            .unwrap();

        let notification = gdb.notification().await;
        assert!(notification.starts_with("Stop:T1e"), "{}", notification);
        assert!(notification.ends_with("thread:p64.64;"), "{}", notification);

        let next = gdb.request("vStopped").await;
        assert!(next.starts_with("T02"), "{}", next);
        assert!(next.ends_with("thread:p64.65;"), "{}", next);
        assert_eq!(gdb.request("vStopped").await, "OK");

        // Running threads cannot go back to all-stop.
        assert_eq!(gdb.request("vCont;c:p64.64").await, "OK");
        assert_eq!(gdb.request("QNonStop:0").await, "E01");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn process_exit() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        gdb.send("vCont;c").await;
        events
            .send(StopEvent::new(main_thread(), StopKind::Exited(3)))
            .await
            .unwrap();
        assert_eq!(gdb.recv().await, "W03;process:64");
        assert_eq!(gdb.request("?").await, "W03;process:64");
        assert_eq!(gdb.request("qfThreadInfo").await, "l");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn kill_ends_the_session() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        gdb.send("k").await;
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(target.killed(), vec![Pid::from_raw(PID)]);
}

#[tokio::test]
async fn detach_removes_breakpoints() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("Z0,1010,1").await, "OK");
        assert_eq!(gdb.request("D;64").await, "OK");
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(target.peek(0x1010, 1), vec![0x90]);
    assert_eq!(target.detached(), vec![Pid::from_raw(PID)]);
}

#[tokio::test]
async fn persistent_commands_outlive_the_debugger() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        let cmds = agent_expr(&printf_seven());
        assert_eq!(
            gdb.request(&format!("Z0,1010,1;cmds:1,{}", cmds)).await,
            "OK"
        );
        assert_eq!(gdb.request("D").await, "OK");

        hit_breakpoint(&t, &events, PID, 0x1010).await;
        events
            .send(StopEvent::new(main_thread(), StopKind::Exited(0)))
            .await
            .unwrap();
    })
    .await;
    assert!(result.is_ok());
    assert!(target.detached().is_empty());
    assert!(actions(&target).contains(&ResumeAction::Step(None)));
    // The breakpoint went away with the process.
    assert_eq!(target.peek(0x1010, 1), vec![0x90]);
}

#[tokio::test]
async fn symbol_lookup() {
    let target = fake_target(&[PID]);
    target.set_symbols(&["foo", "bar"]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, _| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("qSymbol::").await, format!("qSymbol:{}", hex("foo")));
        assert_eq!(
            gdb.request(&format!("qSymbol:1234:{}", hex("foo"))).await,
            format!("qSymbol:{}", hex("bar"))
        );
        assert_eq!(gdb.request(&format!("qSymbol::{}", hex("bar"))).await, "OK");
        // Only unknown symbols are asked for again.
        assert_eq!(gdb.request("qSymbol::").await, format!("qSymbol:{}", hex("bar")));
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn thread_events() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("QThreadEvents:1").await, "OK");
        gdb.send("vCont;c").await;
        let child = Ptid::new(PID, PID + 1);
        events
            .send(StopEvent::new(child, StopKind::ThreadCreated))
            .await
            .unwrap();
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T05create:;"), "{}", stop);
        assert!(stop.ends_with("thread:p64.65;"), "{}", stop);
        assert_eq!(gdb.request("qfThreadInfo").await, "mp64.64,p64.65");

        gdb.send("vCont;c").await;
        events
            .send(StopEvent::new(child, StopKind::ThreadExited(0)))
            .await
            .unwrap();
        assert_eq!(gdb.recv().await, "w00;p64.65");
        assert_eq!(gdb.request("qfThreadInfo").await, "mp64.64");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn fork_events() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        gdb.send("vCont;c").await;
        events
            .send(StopEvent::new(
                main_thread(),
                StopKind::Forked(Ptid::new(200, 200)),
            ))
            .await
            .unwrap();
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T05fork:pc8.c8;"), "{}", stop);
        assert_eq!(gdb.request("qfThreadInfo").await, "mp64.64,pc8.c8");
    })
    .await;
    assert!(result.is_ok());
    assert!(target.detached().is_empty());
}

#[tokio::test]
async fn unannounced_fork_child_is_let_go() {
    let target = fake_target(&[PID]);
    let t = target.clone();
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.request("qSupported:multiprocess+;swbreak+").await;
        gdb.send("vCont;c").await;
        events
            .send(StopEvent::new(
                main_thread(),
                StopKind::Forked(Ptid::new(200, 200)),
            ))
            .await
            .unwrap();
        gdb.interrupt().await;
        let stop = gdb.recv().await;
        assert!(stop.starts_with("T02"), "{}", stop);
        assert_eq!(t.detached(), vec![Pid::from_raw(200)]);
        assert_eq!(gdb.request("qfThreadInfo").await, "mp64.64");
    })
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn exec_forgets_breakpoints() {
    let target = fake_target(&[PID]);
    let result = with_session(StubConfig::default(), &target, &[PID], |mut gdb, events| async move {
        gdb.handshake().await;
        assert_eq!(gdb.request("Z0,1010,1").await, "OK");
        gdb.send("vCont;c").await;
        events
            .send(StopEvent::new(
                main_thread(),
                StopKind::Exec("/bin/true".into()),
            ))
            .await
            .unwrap();
        let stop = gdb.recv().await;
        assert!(
            stop.starts_with(&format!("T05exec:{};", hex("/bin/true"))),
            "{}",
            stop
        );
        assert_eq!(gdb.request("z0,1010,1").await, "E01");
    })
    .await;
    assert!(result.is_ok());
}
