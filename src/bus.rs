// src/bus.rs

//! Publish/subscribe channel for countdown threshold events.
//!
//! One bus is created per mounted timer and dropped with it, so listeners
//! never outlive the countdown that feeds them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::timer::TimerDisplay;

/// Threshold signals produced by the timer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerEvent {
    Low,
    CriticallyLow,
    ReachedNull,
    LimitReached,
}

/// Countdown state at the moment an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerPayload {
    pub seconds_left: i64,
    pub display: TimerDisplay,
}

pub type Handler = Arc<dyn Fn(&TimerPayload) + Send + Sync>;

struct Listener {
    handler: Handler,
    once: bool,
}

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<TimerEvent, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to every emission of `event`.
    /// Subscribing a handler that is already attached to `event` is a no-op.
    pub fn on(&self, event: TimerEvent, handler: Handler) {
        self.subscribe(event, handler, false);
    }

    /// Subscribes `handler` to the next emission of `event` only.
    pub fn once(&self, event: TimerEvent, handler: Handler) {
        self.subscribe(event, handler, true);
    }

    /// Detaches `handler` from `event`. Unknown handlers are ignored.
    pub fn off(&self, event: TimerEvent, handler: &Handler) {
        let mut listeners = self.lock();
        if let Some(list) = listeners.get_mut(&event) {
            list.retain(|l| !same_handler(&l.handler, handler));
            if list.is_empty() {
                listeners.remove(&event);
            }
        }
    }

    /// Delivers `payload` to the listeners of `event` in subscription order.
    ///
    /// Handlers run after the internal lock is released, so they may
    /// subscribe or unsubscribe while being called.
    pub fn emit(&self, event: TimerEvent, payload: &TimerPayload) {
        let handlers: Vec<Handler> = {
            let mut listeners = self.lock();
            let Some(list) = listeners.get_mut(&event) else {
                return;
            };
            let handlers = list.iter().map(|l| l.handler.clone()).collect();
            list.retain(|l| !l.once);
            if list.is_empty() {
                listeners.remove(&event);
            }
            handlers
        };

        tracing::debug!(?event, seconds_left = payload.seconds_left, "emitting timer event");
        for handler in handlers {
            handler(payload);
        }
    }

    pub fn listener_count(&self, event: TimerEvent) -> usize {
        self.lock().get(&event).map_or(0, Vec::len)
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn subscribe(&self, event: TimerEvent, handler: Handler, once: bool) {
        let mut listeners = self.lock();
        let list = listeners.entry(event).or_default();
        if list.iter().any(|l| same_handler(&l.handler, &handler)) {
            return;
        }
        list.push(Listener { handler, once });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TimerEvent, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
