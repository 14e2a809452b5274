//! Command dispatch through the full agent runtime.
//!
//! The controller sends commands over the simulated connection and checks
//! both the response it gets back and the privileged commands that ran.

use std::time::Duration;

use stasis_agent::AgentConfig;
use stasis_core::{DispatchOrigin, FailurePolicy, PackageAction, StatusUpdate};
use stasis_harness::SimAgent;
use stasis_proto::{Frame, Response};

const URL: &str = "ws://host:1/";

#[tokio::test(start_paused = true)]
async fn stop_suspends_every_package() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b\n").await.unwrap();

    peer.send_text(r#"{"action":"stop","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert_eq!(sim.runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);
}

#[tokio::test(start_paused = true)]
async fn start_unsuspends_every_package() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\n\n  com.b  \n").await.unwrap();

    peer.send_text(r#"{"action":"start","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages unsuspended"));
    assert_eq!(sim.runner.commands(), ["pm unsuspend com.a", "pm unsuspend com.b"]);
}

#[tokio::test(start_paused = true)]
async fn wrong_key_runs_nothing() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b\n").await.unwrap();

    peer.send_text(r#"{"action":"start","key":"wrong"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::invalid_key());
    assert!(sim.runner.commands().is_empty());
    assert!(
        sim.drain_status()
            .contains(&StatusUpdate::CommandRejected { reason: "Invalid key".into() })
    );
}

#[tokio::test(start_paused = true)]
async fn missing_key_runs_nothing() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();

    peer.send_text(r#"{"action":"stop"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::invalid_key());
    assert!(sim.runner.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_message_keeps_connection_open() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();

    peer.send_text("{not json");
    assert_eq!(peer.recv_response().await.unwrap(), Response::invalid_format());

    assert!(sim.agent.is_connected());
    assert!(!peer.is_closed());

    // Still serving commands on the same connection
    peer.send_text(r#"{"action":"stop","key":"k1"}"#);
    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert_eq!(sim.transport.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_action_is_named_in_response() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();

    peer.send_text(r#"{"action":"reboot","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::error("Unknown action: reboot"));
    assert!(sim.runner.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn binary_frames_get_no_response() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();

    peer.send(Frame::Binary(vec![0xde, 0xad]));
    peer.send_text(r#"{"action":"stop","key":"k1"}"#);

    // The first response belongs to the text command
    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert!(peer.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn commands_are_handled_in_arrival_order() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b").await.unwrap();

    peer.send_text(r#"{"action":"stop","key":"k1"}"#);
    peer.send_text(r#"{"action":"stop","key":"nope"}"#);
    peer.send_text(r#"{"action":"start","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert_eq!(peer.recv_response().await.unwrap(), Response::invalid_key());
    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages unsuspended"));
    assert_eq!(
        sim.runner.commands(),
        ["pm suspend com.a", "pm suspend com.b", "pm unsuspend com.a", "pm unsuspend com.b"]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_package_list_still_succeeds() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "\n  \n").await.unwrap();

    peer.send_text(r#"{"action":"stop","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert!(sim.runner.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failures_are_best_effort_by_default() {
    let mut sim = SimAgent::start();
    sim.runner.fail_for("com.a");
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b").await.unwrap();

    peer.send_text(r#"{"action":"stop","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages suspended"));
    assert_eq!(sim.runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);
}

#[tokio::test(start_paused = true)]
async fn launch_failures_do_not_abort_the_batch() {
    let mut sim = SimAgent::start();
    sim.runner.fail_launch();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b").await.unwrap();

    peer.send_text(r#"{"action":"start","key":"k1"}"#);

    assert_eq!(peer.recv_response().await.unwrap(), Response::success("Packages unsuspended"));
    assert_eq!(sim.runner.commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn strict_policy_reports_failures() {
    let config = AgentConfig { policy: FailurePolicy::Strict, ..AgentConfig::default() };
    let mut sim = SimAgent::with_config(config);
    sim.runner.fail_for("com.b");
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b").await.unwrap();

    peer.send_text(r#"{"action":"stop","key":"k1"}"#);

    assert_eq!(
        peer.recv_response().await.unwrap(),
        Response::error("Failed to suspend 1 of 2 packages")
    );
    assert_eq!(sim.runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);
}

#[tokio::test(start_paused = true)]
async fn local_action_bypasses_the_wire() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a\ncom.b").await.unwrap();
    sim.drain_status();

    sim.agent.execute_action("stop", "k1").await;

    assert_eq!(sim.runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);
    assert!(peer.try_recv().is_none());
    assert_eq!(
        sim.drain_status(),
        [StatusUpdate::ActionApplied {
            origin: DispatchOrigin::Local,
            action: PackageAction::Suspend,
            failed: 0,
            total: 2,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn local_action_with_wrong_key_is_ignored() {
    let mut sim = SimAgent::start();
    let mut peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();

    sim.agent.execute_action("start", "k2").await;
    sim.agent.execute_action("start", "").await;
    sim.agent.execute_action("reboot", "k1").await;

    assert!(sim.runner.commands().is_empty());
    assert!(peer.try_recv().is_none());
    assert!(sim.agent.is_connected());
}

#[tokio::test(start_paused = true)]
async fn local_action_works_while_reconnecting() {
    let mut sim = SimAgent::start();
    let peer = sim.connect_peer(URL, "k1", "com.a").await.unwrap();
    drop(peer);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!sim.agent.is_connected());

    sim.agent.execute_action("start", "k1").await;

    assert_eq!(sim.runner.commands(), ["pm unsuspend com.a"]);
}

#[tokio::test(start_paused = true)]
async fn local_action_without_session_is_ignored() {
    let sim = SimAgent::start();

    sim.agent.execute_action("stop", "k1").await;

    assert!(sim.runner.commands().is_empty());
}
