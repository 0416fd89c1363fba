//! Reconnection, displacement, rejection, and capacity scenarios.

mod common;

use common::*;

use std::time::Duration;

use bounce_core::{Config, Intent};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

#[tokio::test]
async fn test_clean_takeover_resumes_without_membership_change() {
    let (addr, _registry) = start_server(test_config()).await;

    let mut a = dial(addr, "takeover", "CL1", -1).await;
    expect_intent(&mut a, Intent::Welcome).await;
    let mut b = dial(addr, "takeover", "CL2", -1).await;
    expect_intent(&mut b, Intent::Welcome).await;
    let joiner = expect_intent(&mut a, Intent::Joiner).await;

    // A's transport drops without telling the room.
    drop(a);

    // Within the grace window, a replacement resumes at the last event
    // the predecessor consumed; replay starts exactly there.
    let mut a2 = dial(addr, "takeover", "CL1", joiner.num).await;
    let replayed = expect_intent(&mut a2, Intent::Joiner).await;
    assert_eq!(replayed.num, joiner.num);
    assert_eq!(replayed.from, vec!["CL2"]);

    // Live events continue at the very next seq.
    send_bytes(&mut b, b"hello").await;
    let peer = expect_intent(&mut a2, Intent::Peer).await;
    assert_eq!(peer.num, joiner.num + 1);
    assert_eq!(peer.body.as_deref(), Some(&b"hello"[..]));
    expect_intent(&mut b, Intent::Receipt).await;

    // B never hears about the swap, even after the old session's grace
    // expires.
    assert_quiet(&mut b, Duration::from_millis(900)).await;
}

#[tokio::test]
async fn test_leaver_after_grace_expires() {
    let (addr, registry) = start_server(test_config()).await;

    let mut a = dial(addr, "leaver", "CL1", -1).await;
    expect_intent(&mut a, Intent::Welcome).await;
    let mut b = dial(addr, "leaver", "CL2", -1).await;
    expect_intent(&mut b, Intent::Welcome).await;
    expect_intent(&mut a, Intent::Joiner).await;

    drop(a);

    // Nobody came back: B hears the leaver once the grace runs out.
    let leaver = expect_intent(&mut b, Intent::Leaver).await;
    assert_eq!(leaver.from, vec!["CL1"]);
    assert_eq!(leaver.to, vec!["CL2"]);

    // The room retains B.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.active_sessions("/g/leaver").await, 1);
    send_bytes(&mut b, b"still here").await;
    expect_intent(&mut b, Intent::Receipt).await;
}

#[tokio::test]
async fn test_fresh_session_displaces_same_id() {
    let (addr, _registry) = start_server(test_config()).await;

    let mut a = dial(addr, "displace", "CL1", -1).await;
    expect_intent(&mut a, Intent::Welcome).await;
    let mut b = dial(addr, "displace", "CL2", -1).await;
    expect_intent(&mut b, Intent::Welcome).await;
    expect_intent(&mut a, Intent::Joiner).await;

    // Same identity, no history: the old session is displaced and the
    // identity leaves then rejoins.
    let mut a2 = dial(addr, "displace", "CL1", -1).await;

    let leaver = expect_intent(&mut b, Intent::Leaver).await;
    assert_eq!(leaver.from, vec!["CL1"]);
    let joiner = expect_intent(&mut b, Intent::Joiner).await;
    assert_eq!(joiner.from, vec!["CL1"]);
    assert_eq!(joiner.num, leaver.num + 1);

    let welcome = expect_intent(&mut a2, Intent::Welcome).await;
    assert_eq!(welcome.from, vec!["CL2"]);
    assert_eq!(welcome.num, joiner.num);

    // The displaced transport is closed by the server.
    expect_close(&mut a).await;
}

#[tokio::test]
async fn test_bad_lastnum_rejected_with_policy_close() {
    let (addr, _registry) = start_server(test_config()).await;

    let mut b = dial(addr, "badlast", "CL2", -1).await;
    expect_intent(&mut b, Intent::Welcome).await;

    // A resume-point the room cannot produce.
    let mut ghost = dial(addr, "badlast", "CL1", 99).await;
    let rejection = expect_intent(&mut ghost, Intent::BadLastnum).await;
    assert_eq!(rejection.to, vec!["CL1"]);

    let frame = expect_close(&mut ghost).await.expect("expected a close frame");
    assert_eq!(frame.code, CloseCode::Policy);
    assert!(frame.reason.contains("lastnum"));

    // No membership change leaked to the room.
    assert_quiet(&mut b, Duration::from_millis(600)).await;
}

#[tokio::test]
async fn test_capacity_rejection_names_the_limit() {
    let config = Config {
        max_clients_per_room: 3,
        ..test_config()
    };
    let (addr, _registry) = start_server(config).await;

    let mut first = dial(addr, "cap", "CL1", -1).await;
    expect_intent(&mut first, Intent::Welcome).await;
    let mut second = dial(addr, "cap", "CL2", -1).await;
    expect_intent(&mut second, Intent::Welcome).await;
    let mut third = dial(addr, "cap", "CL3", -1).await;
    expect_intent(&mut third, Intent::Welcome).await;

    // One over the cap: rejected before attaching, with the diagnostic
    // in the close frame.
    let mut fourth = dial(addr, "cap", "CL4", -1).await;
    let frame = expect_close(&mut fourth).await.expect("expected a close frame");
    assert!(frame.reason.contains("maximum clients"));
}

#[tokio::test]
async fn test_slot_reopens_after_grace() {
    let config = Config {
        max_clients_per_room: 2,
        ..test_config()
    };
    let (addr, _registry) = start_server(config).await;

    let mut a = dial(addr, "reopen", "CL1", -1).await;
    expect_intent(&mut a, Intent::Welcome).await;
    let mut b = dial(addr, "reopen", "CL2", -1).await;
    expect_intent(&mut b, Intent::Welcome).await;
    expect_intent(&mut a, Intent::Joiner).await;

    drop(b);
    // B's slot is held for the grace window, then freed.
    expect_intent(&mut a, Intent::Leaver).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut c = dial(addr, "reopen", "CL3", -1).await;
    expect_intent(&mut c, Intent::Welcome).await;
}
