//! Session behavior against the scripted transport: handshake outcomes,
//! reconnect policy, cancellation and inbound routing.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde_json::{Value, json};
use tether_client::{ConnectionState, Session, SessionConfig, SessionError, SystemEnv};
use tether_core::LifecycleError;
use tether_harness::{
    EventLog, Handshake, SIM_ENDPOINT, ServerScript, SimTransport, sim_session, sim_session_with,
};
use tether_proto::{Frame, event};

fn rejection(code: u16) -> Handshake {
    Handshake::Reject { code, message: "token expired".to_string() }
}

#[tokio::test]
async fn connect_sends_hello_and_reaches_connected() {
    let (mut session, server, _env) = sim_session(1);

    session.connect("tok-1").await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.session_id(), Some("sess-1"));
    assert_eq!(server.endpoints(), vec![tether_harness::SIM_ENDPOINT]);

    let hello = &server.sent_on(1)[0];
    assert_eq!(hello.event, "hello");
    assert_eq!(hello.payload, json!({ "version": 1, "token": "tok-1" }));
}

#[tokio::test]
async fn malformed_token_fails_without_io() {
    let (mut session, server, _env) = sim_session(1);

    for token in ["", "two words", "line\nbreak"] {
        let result = session.connect(token).await;
        assert!(matches!(result, Err(SessionError::InvalidToken(_))), "{token:?}: {result:?}");
    }
    assert!(server.endpoints().is_empty());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (mut session, _server, _env) = sim_session(1);
    session.connect("tok-1").await.unwrap();

    let result = session.connect("tok-2").await;
    assert!(matches!(result, Err(SessionError::InvalidState { .. })));
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn rejected_handshake_ends_disconnected() {
    let script = ServerScript { handshake: rejection(401), ..ServerScript::default() };
    let (mut session, server, _env) = sim_session_with(1, script);
    let log = EventLog::new();
    log.attach(&mut session, &[event::CONNECTION_STATE_CHANGED]);

    let result = session.connect("tok-1").await;

    assert!(matches!(
        result,
        Err(SessionError::ConnectFailed(LifecycleError::Rejected { code: 401, .. }))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(server.endpoints().len(), 1, "first attempt is not retried");
    assert_eq!(log.states(), vec![ConnectionState::Connecting, ConnectionState::Disconnected]);
}

#[tokio::test]
async fn refused_transport_ends_disconnected() {
    let (mut session, server, _env) = sim_session(1);
    server.refuse_opens(1);

    let result = session.connect("tok-1").await;
    assert!(matches!(result, Err(SessionError::ConnectFailed(LifecycleError::Transport(_)))));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // Caller may try again
    session.connect("tok-1").await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    let script = ServerScript { handshake: Handshake::Silent, ..ServerScript::default() };
    let (mut session, _server, env) = sim_session_with(1, script);

    let result = session.connect("tok-1").await;

    assert!(matches!(
        result,
        Err(SessionError::ConnectFailed(LifecycleError::HandshakeTimeout { .. }))
    ));
    assert_eq!(env.elapsed(), Duration::from_secs(30));
}

#[tokio::test]
async fn auth_rejection_during_reconnect_stops_retrying() {
    let (mut session, server, _env) = sim_session(2);
    session.connect("tok-1").await.unwrap();

    server.set_handshake(rejection(401));
    server.drop_connection();

    session.run().await.unwrap();

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(session.last_error(), Some(LifecycleError::Rejected { code: 401, .. })));
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn unavailable_server_is_retried() {
    let (mut session, server, _env) = sim_session(2);
    session.connect("tok-1").await.unwrap();

    server.set_handshake(rejection(503));
    server.drop_connection();
    for _ in 0..4 {
        session.step().await.unwrap();
    }
    assert_ne!(session.state(), ConnectionState::Disconnected);

    server.set_handshake(Handshake::Accept);
    while session.state() != ConnectionState::Connected {
        session.step().await.unwrap();
    }
    assert!(server.connections() >= 3);
}

#[tokio::test]
async fn server_goodbye_triggers_reconnect() {
    let (mut session, server, _env) = sim_session(3);
    session.connect("tok-1").await.unwrap();

    server.push_frame(&Frame::new(event::GOODBYE, json!({ "reason": "deploy" })));
    session.step().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    session.step().await.unwrap();
    session.step().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.session_id(), Some("sess-2"));
}

#[tokio::test]
async fn silent_peer_hits_idle_timeout() {
    let script = ServerScript { answer_pings: false, ..ServerScript::default() };
    let (mut session, server, env) = sim_session_with(4, script);
    session.connect("tok-1").await.unwrap();

    while session.state() == ConnectionState::Connected {
        session.step().await.unwrap();
    }

    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert_eq!(env.elapsed(), Duration::from_secs(60));
    let pings = server.sent_events().iter().filter(|e| *e == "ping").count();
    assert_eq!(pings, 2);
}

#[tokio::test]
async fn heartbeats_keep_connection_alive() {
    let (mut session, server, env) = sim_session(4);
    session.connect("tok-1").await.unwrap();

    while env.elapsed() < Duration::from_secs(300) {
        session.step().await.unwrap();
    }

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (mut session, server, _env) = sim_session(4);
    session.connect("tok-1").await.unwrap();
    server.clear_sent();

    server.push_frame(&Frame::empty(event::PING));
    session.step().await.unwrap();

    assert_eq!(server.sent_events(), vec!["pong"]);
}

#[tokio::test]
async fn cancel_during_backoff_disconnects() {
    let (mut session, server, _env) = sim_session(5);
    session.connect("tok-1").await.unwrap();
    session.join("room-1").await.unwrap();

    server.drop_connection();
    session.step().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    session.canceller().cancel();
    assert_eq!(session.step().await, Err(SessionError::Cancelled));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.rooms().is_empty());
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn cancel_before_connect_is_ignored() {
    let (mut session, _server, _env) = sim_session(5);

    session.canceller().cancel();
    session.connect("tok-1").await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn cancel_aborts_pending_handshake() {
    let script = ServerScript { handshake: Handshake::Silent, ..ServerScript::default() };
    let (mut session, _server, _env) = sim_session_with(5, script);
    let canceller = session.canceller();

    let log = EventLog::new();
    log.attach(&mut session, &[event::CONNECTION_STATE_CHANGED]);

    // Cancel as soon as the attempt starts
    session.on(event::CONNECTION_STATE_CHANGED, move |payload: &Value| {
        if payload["state"] == "connecting" {
            canceller.cancel();
        }
        Ok(())
    });

    assert_eq!(session.connect("tok-1").await, Err(SessionError::Cancelled));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(log.states(), vec![ConnectionState::Connecting, ConnectionState::Disconnected]);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_forgets_rooms() {
    let (mut session, server, _env) = sim_session(6);
    session.connect("tok-1").await.unwrap();
    session.join("room-1").await.unwrap();

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.rooms().is_empty());
    assert_eq!(server.closes(), 1);

    // Explicit reconnect does not resurrect rooms
    session.connect("tok-1").await.unwrap();
    assert_eq!(server.sent_events().iter().filter(|e| *e == "join-room").count(), 1);
}

#[tokio::test]
async fn leave_sends_leave_room() {
    let (mut session, server, _env) = sim_session(6);
    session.connect("tok-1").await.unwrap();

    session.join("room-1").await.unwrap();
    session.leave("room-1").await.unwrap();
    session.leave("room-1").await.unwrap();

    assert!(session.rooms().is_empty());
    assert!(server.joined_rooms().is_empty());
    assert_eq!(server.sent_events(), vec!["hello", "join-room", "leave-room"]);
}

#[tokio::test]
async fn malformed_inbound_frames_are_dropped() {
    let (mut session, server, _env) = sim_session(7);
    session.connect("tok-1").await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    session.on("cohort-announcement", move |_: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    server.push_raw(b"{ not json".to_vec());
    server.push_raw(br#"{"event":"","payload":1}"#.to_vec());
    server.push_frame(&Frame::new("cohort-announcement", json!({ "text": "welcome" })));

    for _ in 0..3 {
        session.step().await.unwrap();
    }

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_handler_does_not_block_others() {
    let (mut session, server, _env) = sim_session(8);
    session.connect("tok-1").await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    session.on(event::MESSAGE_RECEIVED, |_: &Value| Err("render failed".into()));
    session.on(event::MESSAGE_RECEIVED, |_: &Value| -> tether_client::HandlerResult {
        panic!("component torn down")
    });
    let counter = Arc::clone(&seen);
    session.on(event::MESSAGE_RECEIVED, move |_: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    server.push_frame(&Frame::new(
        event::MESSAGE_RECEIVED,
        json!({ "sender_id": "u2", "room_id": "r", "content": "hi", "created_at": 1 }),
    ));
    session.step().await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn off_twice_is_a_noop() {
    let (mut session, _server, _env) = sim_session(9);
    let token = session.on("x", |_: &Value| Ok(()));

    assert!(session.off(&token));
    assert!(!session.off(&token));
    assert_eq!(session.router_mut().handler_count("x"), 0);
}

#[tokio::test]
async fn send_rejected_while_reconnecting() {
    let (mut session, server, _env) = sim_session(10);
    session.connect("tok-1").await.unwrap();

    server.drop_connection();
    session.step().await.unwrap();

    let result = session.send("custom", json!({})).await;
    assert_eq!(result, Err(SessionError::NotConnected { state: ConnectionState::Reconnecting }));
}

#[tokio::test]
async fn send_on_broken_transport_starts_reconnect() {
    let (mut session, server, _env) = sim_session(10);
    session.connect("tok-1").await.unwrap();

    server.drop_connection();
    let result = session.send("custom", json!({})).await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(session.state(), ConnectionState::Reconnecting);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_stalled_open() {
    let server = SimTransport::new();
    server.stall_opens(1);
    let mut session =
        Session::new(server.clone(), SystemEnv::new(), SessionConfig::new(SIM_ENDPOINT));
    let timeout = session.config().handshake_timeout;

    let canceller = session.canceller();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let start = tokio::time::Instant::now();
    assert_eq!(session.connect("tok-1").await, Err(SessionError::Cancelled));

    assert!(start.elapsed() < timeout, "waited out the open timeout: {:?}", start.elapsed());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn cancel_during_reconnect_open_disconnects() {
    let (mut session, server, env) = sim_session(11);
    session.connect("tok-1").await.unwrap();
    session.join("room-1").await.unwrap();

    let canceller = session.canceller();
    session.on(event::CONNECTION_STATE_CHANGED, move |payload: &Value| {
        if payload["state"] == "connecting" {
            canceller.cancel();
        }
        Ok(())
    });

    server.stall_opens(1);
    server.drop_connection();
    session.step().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    let before = env.elapsed();
    assert_eq!(session.step().await, Err(SessionError::Cancelled));

    assert!(env.elapsed() - before < session.config().handshake_timeout);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.rooms().is_empty());
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn inbound_state_change_frames_are_not_routed() {
    let (mut session, server, _env) = sim_session(12);
    session.connect("tok-1").await.unwrap();
    let log = EventLog::new();
    log.attach(&mut session, &[event::CONNECTION_STATE_CHANGED]);

    server.push_frame(&Frame::new(
        event::CONNECTION_STATE_CHANGED,
        json!({ "state": "disconnected", "generation": 99 }),
    ));
    server.push_frame(&Frame::new("cohort-announcement", json!({})));
    session.step().await.unwrap();
    session.step().await.unwrap();

    assert!(log.states().is_empty(), "spoofed state reached handlers: {:?}", log.states());
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.generation(), 1);
}

#[tokio::test]
async fn reserved_events_cannot_be_sent() {
    let (mut session, server, _env) = sim_session(13);
    session.connect("tok-1").await.unwrap();
    server.clear_sent();

    let reserved = [event::JOIN_ROOM, event::LEAVE_ROOM, event::HELLO, event::CONNECTION_STATE_CHANGED];
    for name in reserved {
        let result = session.send(name, json!({ "room_id": "room-1" })).await;
        assert_eq!(result, Err(SessionError::ReservedEvent(name.to_string())));
    }

    assert!(server.sent().is_empty());
    assert!(server.joined_rooms().is_empty());
    assert!(session.rooms().is_empty());
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn failed_replay_after_handshake_retries_on_next_connection() {
    let (mut session, server, _env) = sim_session(14);
    session.join("room-1").await.unwrap();

    // hello goes out, the replayed join breaks the connection
    server.fail_sends_after(1);
    session.connect("tok-1").await.unwrap();

    assert_eq!(session.generation(), 1);
    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert!(server.joined_rooms().is_empty());

    while session.state() != ConnectionState::Connected {
        session.step().await.unwrap();
    }

    assert_eq!(session.generation(), 2);
    assert_eq!(server.joined_rooms(), vec!["room-1"]);
    let events: Vec<String> = server.sent_on(2).into_iter().map(|f| f.event).collect();
    assert_eq!(events, vec!["hello", "join-room"]);
}
