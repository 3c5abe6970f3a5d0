//! Local publish/subscribe for named events.
//!
//! Handlers are registered per event name and run synchronously, in
//! registration order, inside [`EventRouter::emit_local`]. A handler that
//! returns an error or panics is logged and skipped; the remaining handlers
//! still run.
//!
//! Two ways to unregister:
//! - [`EventRouter::off`] with the [`HandlerToken`] returned by
//!   [`EventRouter::on`]
//! - dropping the [`Subscription`] returned by [`EventRouter::subscribe`]
//!
//! Subscriptions release through a channel, so they can be dropped anywhere
//! (including inside a handler). Released handlers are removed before the next
//! emit.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
};

use serde_json::Value;
use tether_proto::{Frame, ProtocolError};
use tokio::sync::mpsc;

/// Error a handler may return. Logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Registered callback.
pub type Handler = Box<dyn FnMut(&Value) -> HandlerResult + Send>;

/// Identifies one registered handler.
///
/// Tokens are never reused within a router, so a stale token can never remove
/// a newer handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerToken {
    event: String,
    id: u64,
}

impl HandlerToken {
    /// Event this handler is registered for.
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Drop guard that unregisters its handler.
///
/// Call [`Subscription::detach`] to keep the handler registered for the
/// lifetime of the router.
#[must_use = "dropping a Subscription unregisters the handler immediately"]
#[derive(Debug)]
pub struct Subscription {
    token: Option<HandlerToken>,
    release: mpsc::UnboundedSender<HandlerToken>,
}

impl Subscription {
    /// Token of the guarded handler.
    pub fn token(&self) -> Option<&HandlerToken> {
        self.token.as_ref()
    }

    /// Keep the handler registered and return its token.
    pub fn detach(mut self) -> Option<HandlerToken> {
        self.token.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // Router gone means the handler is gone too
            let _ = self.release.send(token);
        }
    }
}

/// Outcome of one [`EventRouter::emit_local`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Handlers invoked
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Maps event names to ordered handler lists.
pub struct EventRouter {
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    next_id: u64,
    release_tx: mpsc::UnboundedSender<HandlerToken>,
    release_rx: mpsc::UnboundedReceiver<HandlerToken>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> =
            self.handlers.iter().map(|(event, list)| (event.as_str(), list.len())).collect();
        f.debug_struct("EventRouter").field("handlers", &counts).finish_non_exhaustive()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        Self { handlers: HashMap::new(), next_id: 0, release_tx, release_rx }
    }

    /// Register `handler` for `event`. Runs after every handler already
    /// registered for the same event.
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F) -> HandlerToken
    where
        F: FnMut(&Value) -> HandlerResult + Send + 'static,
    {
        let event = event.into();
        let id = self.next_id;
        self.next_id += 1;

        self.handlers.entry(event.clone()).or_default().push((id, Box::new(handler)));
        HandlerToken { event, id }
    }

    /// Register `handler` and return a guard that unregisters it on drop.
    pub fn subscribe<F>(&mut self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: FnMut(&Value) -> HandlerResult + Send + 'static,
    {
        let token = self.on(event, handler);
        Subscription { token: Some(token), release: self.release_tx.clone() }
    }

    /// Remove exactly the handler identified by `token`.
    ///
    /// Returns false if it was already removed (a no-op).
    pub fn off(&mut self, token: &HandlerToken) -> bool {
        let Some(list) = self.handlers.get_mut(&token.event) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != token.id);
        let removed = list.len() != before;

        if list.is_empty() {
            self.handlers.remove(&token.event);
        }
        removed
    }

    /// Number of handlers currently registered for `event`.
    pub fn handler_count(&mut self, event: &str) -> usize {
        self.apply_releases();
        self.handlers.get(event).map_or(0, Vec::len)
    }

    /// Total number of registered handlers across all events.
    pub fn total_handlers(&mut self) -> usize {
        self.apply_releases();
        self.handlers.values().map(Vec::len).sum()
    }

    /// Invoke every handler registered for `event` with `payload`.
    ///
    /// Handler errors and panics are logged and counted in the report; they
    /// never stop the remaining handlers.
    pub fn emit_local(&mut self, event: &str, payload: &Value) -> EmitReport {
        self.apply_releases();

        let mut report = EmitReport::default();
        let Some(list) = self.handlers.get_mut(event) else {
            tracing::trace!(event, "no handlers registered");
            return report;
        };

        for (id, handler) in list.iter_mut() {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(event, handler = *id, error = %e, "handler failed");
                },
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        event,
                        handler = *id,
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                },
            }
        }

        report
    }

    /// Dispatch an inbound frame to its event's handlers.
    pub fn dispatch(&mut self, frame: &Frame) -> EmitReport {
        self.emit_local(&frame.event, &frame.payload)
    }

    fn apply_releases(&mut self) {
        while let Ok(token) = self.release_rx.try_recv() {
            self.off(&token);
        }
    }
}

/// Decode an inbound transport message.
///
/// Malformed frames are logged and dropped; the connection stays up.
pub fn decode_inbound(bytes: &[u8]) -> Option<Frame> {
    match Frame::decode(bytes) {
        Ok(frame) => Some(frame),
        Err(ProtocolError::FrameTooLarge { size, max }) => {
            tracing::warn!(size, max, "dropping oversized frame");
            None
        },
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "dropping malformed frame");
            None
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
