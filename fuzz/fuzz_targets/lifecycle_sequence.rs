//! Fuzz target for the connection lifecycle
//!
//! Drives a `Lifecycle` through arbitrary sequences of caller operations,
//! transport events, inbound session frames and clock advances.
//!
//! # Invariants
//!
//! - No operation panics, in any state
//! - Generation never decreases
//! - Scheduled reconnect delays never decrease within one retry loop
//! - Only a hello-reply moves the state to Connected
//! - Disconnected has no pending deadline

#![no_main]

use std::{
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::json;
use tether_core::{ConnectionState, Environment, Lifecycle, LifecycleAction, LifecycleConfig};
use tether_proto::{Frame, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Tick(u64);

impl Sub for Tick {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for Tick {
    type Output = Tick;

    fn add(self, rhs: Duration) -> Tick {
        Tick(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

#[derive(Clone)]
struct FuzzEnv {
    clock_ms: Arc<AtomicU64>,
    entropy: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = Tick;

    fn now(&self) -> Tick {
        Tick(self.clock_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.clock_ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let seed = self.entropy.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::SeqCst).to_be_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = seed[i % 8];
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Connect { token: String },
    Reconnect,
    TransportOpened,
    TransportFailed,
    Disconnect,
    Tick,
    Advance { ms: u32 },
    HelloReply,
    Reject { code: u16 },
    Ping,
    Pong,
    Goodbye,
    Raw { event: String, payload: Vec<u8> },
}

fuzz_target!(|input: (u64, Vec<Op>)| {
    let (seed, ops) = input;
    let env = FuzzEnv {
        clock_ms: Arc::new(AtomicU64::new(0)),
        entropy: Arc::new(AtomicU64::new(seed)),
    };
    let mut lifecycle = Lifecycle::new(LifecycleConfig::default());
    let mut generation = 0;
    let mut last_delay = Duration::ZERO;

    for op in ops.into_iter().take(256) {
        let before = lifecycle.state();
        let mut via_hello_reply = false;

        let actions = match op {
            Op::Connect { token } => lifecycle.connect(&token, env.now()).unwrap_or_default(),
            Op::Reconnect => lifecycle.reconnect(env.now()).unwrap_or_default(),
            Op::TransportOpened => lifecycle.transport_opened().unwrap_or_default(),
            Op::TransportFailed => lifecycle.transport_failed("fuzz", &env),
            Op::Disconnect => lifecycle.disconnect(),
            Op::Tick => lifecycle.tick(&env),
            Op::Advance { ms } => {
                env.clock_ms.fetch_add(u64::from(ms), Ordering::SeqCst);
                Vec::new()
            },
            Op::HelloReply => {
                via_hello_reply = true;
                let frame = Frame::new(
                    event::HELLO_REPLY,
                    json!({ "session_id": "s", "user_id": "u" }),
                );
                lifecycle.handle_frame(&frame, &env).unwrap_or_default()
            },
            Op::Reject { code } => {
                let frame = Frame::new(event::ERROR, json!({ "code": code, "message": "no" }));
                lifecycle.handle_frame(&frame, &env).unwrap_or_default()
            },
            Op::Ping => lifecycle.handle_frame(&Frame::empty(event::PING), &env).unwrap_or_default(),
            Op::Pong => lifecycle.handle_frame(&Frame::empty(event::PONG), &env).unwrap_or_default(),
            Op::Goodbye => {
                let frame = Frame::new(event::GOODBYE, json!({ "reason": "fuzz" }));
                lifecycle.handle_frame(&frame, &env).unwrap_or_default()
            },
            Op::Raw { event: name, payload } => {
                via_hello_reply = name == event::HELLO_REPLY;
                let payload = serde_json::from_slice(&payload).unwrap_or_default();
                lifecycle.handle_frame(&Frame::new(name, payload), &env).unwrap_or_default()
            },
        };

        assert!(lifecycle.generation() >= generation);
        generation = lifecycle.generation();

        if lifecycle.state() == ConnectionState::Connected && before != ConnectionState::Connected {
            assert!(via_hello_reply, "entered Connected without hello-reply");
            last_delay = Duration::ZERO;
        }
        if lifecycle.state() == ConnectionState::Disconnected {
            assert!(lifecycle.next_deadline().is_none());
            last_delay = Duration::ZERO;
        }

        for action in &actions {
            if let LifecycleAction::ScheduleReconnect { delay, .. } = action {
                assert!(*delay >= last_delay, "backoff shrank");
                last_delay = *delay;
            }
        }
    }
});
