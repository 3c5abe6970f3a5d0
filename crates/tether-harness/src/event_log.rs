//! Recording handlers for scenario oracles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tether_client::{ConnectionState, Environment, Session, StateChange, Transport};
use tether_core::HandlerToken;
use tether_proto::event;

/// One delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Event name
    pub event: String,
    /// Payload as delivered to the handler
    pub payload: Value,
}

/// Shared log of events delivered to local handlers, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<LoggedEvent>>>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoggedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a recording handler for each of `events` on `session`.
    pub fn attach<T, E>(&self, session: &mut Session<T, E>, events: &[&str]) -> Vec<HandlerToken>
    where
        T: Transport,
        E: Environment,
    {
        events
            .iter()
            .map(|name| {
                let log = self.clone();
                let name = (*name).to_string();
                session.on(name.clone(), move |payload: &Value| {
                    log.record(&name, payload.clone());
                    Ok(())
                })
            })
            .collect()
    }

    /// Append an event.
    pub fn record(&self, event: &str, payload: Value) {
        self.lock().push(LoggedEvent { event: event.to_string(), payload });
    }

    /// Snapshot of every logged event.
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.lock().clone()
    }

    /// Names of logged events, in order.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Payloads logged for `event`, in order.
    pub fn payloads(&self, event: &str) -> Vec<Value> {
        self.lock().iter().filter(|e| e.event == event).map(|e| e.payload.clone()).collect()
    }

    /// Sequence of `connection-state-changed` states.
    pub fn states(&self) -> Vec<ConnectionState> {
        self.payloads(event::CONNECTION_STATE_CHANGED)
            .into_iter()
            .filter_map(|p| serde_json::from_value::<StateChange>(p).ok())
            .map(|change| change.state)
            .collect()
    }

    /// Forget everything logged so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of logged events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
