//! Radio event queue.
//!
//! The radio stack reports completions from its own execution context (a
//! host-stack thread, a tokio task, or the simulated radio inline). None of
//! those contexts touch gateway state. They push a [`RadioEvent`] here, and
//! the single poll loop drains the queue through
//! [`BleManager::poll`](crate::ble::manager::BleManager::poll).
//!
//! ```text
//! ┌──────────────────┐   push()   ┌────────────────────┐  drain_*()  ┌─────────────┐
//! │ radio callbacks  │──────────▶│ lifecycle  (16)    │────────────▶│             │
//! │ (any thread)     │──────────▶│ notifications (64) │────────────▶│  poll loop  │
//! │                  │──────────▶│ advertisements (64)│────────────▶│             │
//! └──────────────────┘            └────────────────────┘             └─────────────┘
//! ```
//!
//! Lifecycle events (scan complete, connect complete, disconnected) get their
//! own lane. Each connection slot has at most one connect and one disconnect
//! outstanding, so the lane cannot overflow while the loop keeps draining.
//! The data lanes are lossy under flood: a push into a full lane is dropped
//! and logged.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::ble::types::{Advertisement, BleUuid, ConnHandle};
use crate::error::RadioError;

const LIFECYCLE_CAP: usize = 16;
const NOTIFICATION_CAP: usize = 64;
const ADVERTISEMENT_CAP: usize = 64;

/// Something the radio stack reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A peripheral advertised during a scan.
    Advertisement(Advertisement),
    /// The timed scan primitive expired.
    ScanComplete,
    /// Outcome of one `begin_connect` attempt.
    ConnectComplete {
        handle: ConnHandle,
        result: Result<(), RadioError>,
    },
    /// The link behind `handle` is gone (local request or link loss).
    Disconnected { handle: ConnHandle },
    /// A subscribed characteristic changed value.
    Notification {
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        data: Vec<u8>,
        is_notify: bool,
    },
}

/// Three-lane bounded queue shared between the radio and the poll loop.
pub struct RadioEventQueue {
    lifecycle: Channel<CriticalSectionRawMutex, RadioEvent, LIFECYCLE_CAP>,
    notifications: Channel<CriticalSectionRawMutex, RadioEvent, NOTIFICATION_CAP>,
    advertisements: Channel<CriticalSectionRawMutex, RadioEvent, ADVERTISEMENT_CAP>,
}

/// Handle cloned into every radio adapter.
pub type SharedRadioEvents = Arc<RadioEventQueue>;

impl RadioEventQueue {
    pub const fn new() -> Self {
        Self {
            lifecycle: Channel::new(),
            notifications: Channel::new(),
            advertisements: Channel::new(),
        }
    }

    pub fn shared() -> SharedRadioEvents {
        Arc::new(Self::new())
    }

    /// Enqueue an event. Safe from any thread.
    /// Returns `false` if the event was dropped because its lane is full.
    pub fn push(&self, event: RadioEvent) -> bool {
        let result = match event {
            RadioEvent::Advertisement(_) => self.advertisements.try_send(event),
            RadioEvent::Notification { .. } => self.notifications.try_send(event),
            _ => self.lifecycle.try_send(event),
        };
        match result {
            Ok(()) => true,
            Err(embassy_sync::channel::TrySendError::Full(dropped)) => {
                warn!("EVENTS: queue full, dropping {}", kind(&dropped));
                false
            }
        }
    }

    /// Pop every pending notification, oldest first.
    pub fn drain_notifications(&self, mut f: impl FnMut(RadioEvent)) {
        while let Ok(event) = self.notifications.try_receive() {
            f(event);
        }
    }

    /// Pop every pending advertisement, oldest first.
    pub fn drain_advertisements(&self, mut f: impl FnMut(RadioEvent)) {
        while let Ok(event) = self.advertisements.try_receive() {
            f(event);
        }
    }

    /// Pop every pending lifecycle event, oldest first.
    pub fn drain_lifecycle(&self, mut f: impl FnMut(RadioEvent)) {
        while let Ok(event) = self.lifecycle.try_receive() {
            f(event);
        }
    }

    /// Discard buffered advertisements (scan results). Returns how many.
    pub fn clear_advertisements(&self) -> usize {
        let mut n = 0;
        while self.advertisements.try_receive().is_ok() {
            n += 1;
        }
        n
    }

    /// `true` when no lane holds an event.
    pub fn is_empty(&self) -> bool {
        self.lifecycle.is_empty() && self.notifications.is_empty() && self.advertisements.is_empty()
    }
}

impl Default for RadioEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn kind(event: &RadioEvent) -> &'static str {
    match event {
        RadioEvent::Advertisement(_) => "advertisement",
        RadioEvent::ScanComplete => "scan-complete",
        RadioEvent::ConnectComplete { .. } => "connect-complete",
        RadioEvent::Disconnected { .. } => "disconnected",
        RadioEvent::Notification { .. } => "notification",
    }
}
