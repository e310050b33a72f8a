//! Radio Connection Manager: scan lifecycle, connection pool, retry, GATT.
//!
//! Wraps a [`RadioPort`] and addresses everything by [`PeripheralId`]. The
//! radio's connection handles never leave this module.
//!
//! ```text
//!            start_scan(0)                       ScanComplete (continuous)
//!   Idle ─────────────────▶ Scanning{cont} ───────────────┐ re-arm
//!    ▲                           │   ▲                    │
//!    │      stop_scan()          │   └────────────────────┘
//!    └──── StopRequested ◀───────┘
//!    ▲                                  ScanComplete (timed)
//!    └──────────────────────────────────── Scanning{timed}
//! ```
//!
//! Connecting never blocks the caller. [`BleManager::connect`] reserves a slot
//! and fires the first attempt. Each attempt's outcome comes back through the
//! event queue. Failed attempts are retried from [`BleManager::poll`] once
//! their backoff deadline passes, up to `connect_attempts`. The final outcome
//! surfaces as [`BleEvent::DeviceConnected`] or [`BleEvent::ConnectFailed`].
//!
//! Slots are only freed on a terminal event: exhausted retries, a cancelled
//! attempt, or the radio confirming a disconnect. A late `Disconnected` can
//! therefore never hit a slot that was already reused.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::pool::{AddressTypeCache, ConnectionPool, ConnectionSlot, SlotState};
use super::types::{Advertisement, AddressType, BleUuid, CharacteristicInfo, ConnHandle, PeripheralId};
use crate::app::ports::RadioPort;
use crate::config::GatewayConfig;
use crate::error::RadioError;
use crate::events::{RadioEvent, SharedRadioEvents};

/// Step used while waiting for the stack to acknowledge a scan stop.
const SETTLE_POLL: Duration = Duration::from_millis(5);

// ── Public types ─────────────────────────────────────────────

/// Shared scan session state. Not per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning { continuous: bool },
    StopRequested,
}

/// Immediate result of [`BleManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Already connected; nothing was attempted.
    Connected,
    /// An attempt is in flight; completion arrives via [`BleManager::poll`].
    Pending,
    /// Refused or failed outright (not ready, pool exhausted, busy).
    Failed,
}

/// Events raised to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    DeviceFound(Advertisement),
    DeviceConnected(PeripheralId),
    ConnectFailed(PeripheralId),
    DeviceDisconnected(PeripheralId),
    Notification {
        id: PeripheralId,
        service: BleUuid,
        characteristic: BleUuid,
        data: Vec<u8>,
        is_notify: bool,
    },
}

/// Result of one connection attempt bookkeeping step.
enum Attempt {
    InFlight,
    Retrying,
    Exhausted,
    Cancelled,
}

// ── Manager ──────────────────────────────────────────────────

pub struct BleManager<R: RadioPort> {
    radio: R,
    events: SharedRadioEvents,
    config: GatewayConfig,
    ready: bool,
    scan: ScanState,
    scan_active: bool,
    pool: ConnectionPool,
    cache: AddressTypeCache,
}

impl<R: RadioPort> BleManager<R> {
    /// `events` must be the same queue the radio adapter pushes into.
    pub fn new(radio: R, events: SharedRadioEvents, config: &GatewayConfig) -> Self {
        Self {
            radio,
            events,
            config: config.clone(),
            ready: false,
            scan: ScanState::Idle,
            scan_active: config.scan.active,
            pool: ConnectionPool::new(),
            cache: AddressTypeCache::new(),
        }
    }

    /// One-time radio bring-up. Idempotent. Returns readiness.
    pub fn initialize(&mut self) -> bool {
        if self.ready {
            return true;
        }
        match self.radio.init(&self.config.scan) {
            Ok(()) => {
                self.ready = true;
                info!(
                    "BLE: ready (interval={} window={} active={})",
                    self.config.scan.interval, self.config.scan.window, self.config.scan.active
                );
            }
            Err(e) => error!("BLE: radio init failed: {}", e),
        }
        self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.scan, ScanState::Scanning { .. })
    }

    // ── Scanning ─────────────────────────────────────────────

    /// Start the shared scan. `duration_secs == 0` scans until stopped.
    pub fn start_scan(&mut self, duration_secs: u32, active: bool) -> bool {
        if !self.ready || self.scan != ScanState::Idle {
            return false;
        }
        let continuous = duration_secs == 0;
        let window = if continuous {
            self.config.rearm_window_secs
        } else {
            duration_secs
        };
        if let Err(e) = self.radio.start_scan(window, active) {
            warn!("BLE: scan start failed: {}", e);
            return false;
        }
        self.scan = ScanState::Scanning { continuous };
        self.scan_active = active;
        info!(
            "BLE: scan started ({}, {})",
            if continuous { "continuous" } else { "timed" },
            if active { "active" } else { "passive" }
        );
        true
    }

    /// Stop the shared scan. On return the stack is no longer scanning and
    /// no buffered scan result will be delivered.
    pub fn stop_scan(&mut self) -> bool {
        if !self.is_scanning() {
            return false;
        }
        self.scan = ScanState::StopRequested;
        if let Err(e) = self.radio.stop_scan() {
            warn!("BLE: scan stop request failed: {}", e);
        }

        let deadline =
            Instant::now() + Duration::from_millis(u64::from(self.config.stop_settle_timeout_ms));
        while self.radio.is_scanning() && Instant::now() < deadline {
            std::thread::sleep(SETTLE_POLL);
        }
        if self.radio.is_scanning() {
            warn!("BLE: stack still scanning after settle timeout");
        }

        self.radio.clear_scan_results();
        let dropped = self.events.clear_advertisements();
        self.scan = ScanState::Idle;
        info!("BLE: scan stopped ({} buffered results dropped)", dropped);
        true
    }

    // ── Connections ──────────────────────────────────────────

    /// Connect to `id`, retrying in the background. See [`ConnectOutcome`].
    pub fn connect(&mut self, id: PeripheralId, now_ms: u64) -> ConnectOutcome {
        if !self.ready {
            return ConnectOutcome::Failed;
        }

        if let Some(idx) = self.pool.find(&id) {
            let Some(slot) = self.pool.get_mut(idx) else {
                return ConnectOutcome::Failed;
            };
            return match &mut slot.state {
                SlotState::Connected { .. } => ConnectOutcome::Connected,
                SlotState::Connecting { cancelled, .. } => {
                    // A new requester revives a cancelled attempt.
                    *cancelled = false;
                    ConnectOutcome::Pending
                }
                SlotState::Disconnecting { .. } => {
                    warn!("BLE: {} is disconnecting, connect refused", id);
                    ConnectOutcome::Failed
                }
            };
        }

        if self.pool.is_full() {
            warn!("BLE: no free connection slot for {}", id);
            return ConnectOutcome::Failed;
        }

        // Scanning and initiating cannot overlap on a single radio.
        if self.is_scanning() {
            self.stop_scan();
        }

        let address_type = self.cache.get(&id).unwrap_or(AddressType::Public);
        let Some(idx) = self.pool.allocate(ConnectionSlot {
            id,
            address_type,
            state: SlotState::Connecting {
                attempt: 0,
                handle: None,
                retry_at_ms: now_ms,
                cancelled: false,
            },
        }) else {
            return ConnectOutcome::Failed;
        };

        info!("BLE: connecting to {} ({:?})", id, address_type);
        match self.attempt(idx, now_ms) {
            Attempt::InFlight | Attempt::Retrying => ConnectOutcome::Pending,
            Attempt::Exhausted | Attempt::Cancelled => ConnectOutcome::Failed,
        }
    }

    /// Request disconnection of `id`. The slot is released when the radio
    /// confirms. Succeeds trivially when `id` has no slot.
    pub fn disconnect(&mut self, id: PeripheralId) -> bool {
        let Some(idx) = self.pool.find(&id) else {
            return true;
        };
        let Some(state) = self.pool.get(idx).map(|s| s.state) else {
            return true;
        };

        match state {
            SlotState::Connected { handle } => match self.radio.disconnect(handle) {
                Ok(()) => {
                    self.set_state(idx, SlotState::Disconnecting { handle });
                    info!("BLE: disconnecting {}", id);
                    true
                }
                Err(e) => {
                    // No completion will follow; release now so the slot cannot leak.
                    warn!("BLE: disconnect of {} refused: {}", id, e);
                    self.radio.release(handle);
                    self.pool.free(idx);
                    false
                }
            },
            SlotState::Connecting {
                handle: Some(h),
                attempt,
                retry_at_ms,
                ..
            } => {
                self.set_state(
                    idx,
                    SlotState::Connecting {
                        attempt,
                        handle: Some(h),
                        retry_at_ms,
                        cancelled: true,
                    },
                );
                info!("BLE: cancelling in-flight connect to {}", id);
                true
            }
            SlotState::Connecting { handle: None, .. } => {
                self.pool.free(idx);
                info!("BLE: cancelled pending connect to {}", id);
                true
            }
            SlotState::Disconnecting { .. } => true,
        }
    }

    pub fn is_connected(&self, id: &PeripheralId) -> bool {
        self.connected_handle(id).is_some()
    }

    /// Lifecycle state of the slot holding `id`, if any.
    pub fn slot_state(&self, id: &PeripheralId) -> Option<SlotState> {
        self.pool
            .find(id)
            .and_then(|idx| self.pool.get(idx))
            .map(|s| s.state)
    }

    /// Occupied connection slots (any lifecycle state).
    pub fn connection_count(&self) -> usize {
        self.pool.occupied()
    }

    pub fn address_type(&self, id: &PeripheralId) -> Option<AddressType> {
        self.cache.get(id)
    }

    // ── GATT ─────────────────────────────────────────────────

    pub fn discover_services(&mut self, id: PeripheralId) -> Option<Vec<BleUuid>> {
        let handle = self.connected_handle(&id)?;
        self.radio
            .services(handle)
            .map_err(|e| warn!("BLE: service discovery on {} failed: {}", id, e))
            .ok()
    }

    pub fn discover_characteristics(
        &mut self,
        id: PeripheralId,
        service: BleUuid,
    ) -> Option<Vec<CharacteristicInfo>> {
        let handle = self.connected_handle(&id)?;
        self.radio
            .characteristics(handle, service)
            .map_err(|e| warn!("BLE: characteristic discovery {}/{} failed: {}", id, service, e))
            .ok()
    }

    /// `None` when the read failed; `Some(empty)` is a genuine empty value.
    pub fn read_characteristic(
        &mut self,
        id: PeripheralId,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Option<Vec<u8>> {
        let handle = self.connected_handle(&id)?;
        self.radio
            .read(handle, service, characteristic)
            .map_err(|e| warn!("BLE: read {}/{}/{} failed: {}", id, service, characteristic, e))
            .ok()
    }

    pub fn write_characteristic(
        &mut self,
        id: PeripheralId,
        service: BleUuid,
        characteristic: BleUuid,
        data: &[u8],
        without_response: bool,
    ) -> bool {
        let Some(handle) = self.connected_handle(&id) else {
            return false;
        };
        self.radio
            .write(handle, service, characteristic, data, without_response)
            .map_err(|e| warn!("BLE: write {}/{}/{} failed: {}", id, service, characteristic, e))
            .is_ok()
    }

    pub fn notify_characteristic(
        &mut self,
        id: PeripheralId,
        service: BleUuid,
        characteristic: BleUuid,
        enable: bool,
    ) -> bool {
        let Some(handle) = self.connected_handle(&id) else {
            return false;
        };
        self.radio
            .set_notify(handle, service, characteristic, enable)
            .map_err(|e| warn!("BLE: notify {}/{}/{} failed: {}", id, service, characteristic, e))
            .is_ok()
    }

    // ── Event processing ─────────────────────────────────────

    /// Drain radio events, run due retries, and return what the consumer
    /// must act on. Call once per loop iteration.
    pub fn poll(&mut self, now_ms: u64) -> Vec<BleEvent> {
        let mut out = Vec::new();
        let events = SharedRadioEvents::clone(&self.events);

        events.drain_notifications(|ev| self.on_radio_event(ev, now_ms, &mut out));
        events.drain_advertisements(|ev| self.on_radio_event(ev, now_ms, &mut out));
        events.drain_lifecycle(|ev| self.on_radio_event(ev, now_ms, &mut out));
        self.run_due_retries(now_ms, &mut out);
        out
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    // ── Internals ────────────────────────────────────────────

    fn on_radio_event(&mut self, event: RadioEvent, now_ms: u64, out: &mut Vec<BleEvent>) {
        match event {
            RadioEvent::Advertisement(adv) => {
                if !self.is_scanning() {
                    debug!("BLE: late advertisement from {} dropped", adv.id);
                    return;
                }
                if adv.address_type != AddressType::Unknown
                    && self.cache.insert_if_absent(adv.id, adv.address_type)
                {
                    debug!("BLE: cached {} as {:?}", adv.id, adv.address_type);
                }
                out.push(BleEvent::DeviceFound(adv));
            }
            RadioEvent::Notification {
                handle,
                service,
                characteristic,
                data,
                is_notify,
            } => {
                let id = self
                    .pool
                    .find_by_handle(handle)
                    .and_then(|idx| self.pool.get(idx))
                    .filter(|s| matches!(s.state, SlotState::Connected { .. }))
                    .map(|s| s.id);
                if let Some(id) = id {
                    out.push(BleEvent::Notification {
                        id,
                        service,
                        characteristic,
                        data,
                        is_notify,
                    });
                }
            }
            RadioEvent::ScanComplete => self.on_scan_complete(),
            RadioEvent::ConnectComplete { handle, result } => {
                self.on_connect_complete(handle, result, now_ms, out);
            }
            RadioEvent::Disconnected { handle } => self.on_disconnected(handle, now_ms, out),
        }
    }

    fn on_scan_complete(&mut self) {
        if self.radio.is_scanning() {
            // Stale completion from a scan that was stopped and restarted.
            return;
        }
        match self.scan {
            ScanState::Scanning { continuous: true } => {
                if let Err(e) = self
                    .radio
                    .start_scan(self.config.rearm_window_secs, self.scan_active)
                {
                    warn!("BLE: scan re-arm failed: {}", e);
                    self.scan = ScanState::Idle;
                } else {
                    debug!("BLE: scan re-armed");
                }
            }
            ScanState::Scanning { continuous: false } => {
                self.radio.clear_scan_results();
                self.scan = ScanState::Idle;
                info!("BLE: timed scan finished");
            }
            ScanState::Idle | ScanState::StopRequested => {}
        }
    }

    fn on_connect_complete(
        &mut self,
        handle: ConnHandle,
        result: Result<(), RadioError>,
        now_ms: u64,
        out: &mut Vec<BleEvent>,
    ) {
        let Some(idx) = self.pool.find_by_handle(handle) else {
            if result.is_ok() {
                warn!("BLE: orphan connection {} torn down", handle);
                if self.radio.disconnect(handle).is_err() {
                    self.radio.release(handle);
                }
            }
            return;
        };
        let Some(slot) = self.pool.get(idx).copied() else {
            return;
        };
        let SlotState::Connecting {
            attempt, cancelled, ..
        } = slot.state
        else {
            return;
        };

        match result {
            Ok(()) if cancelled => match self.radio.disconnect(handle) {
                Ok(()) => self.set_state(idx, SlotState::Disconnecting { handle }),
                Err(_) => {
                    self.radio.release(handle);
                    self.pool.free(idx);
                }
            },
            Ok(()) => {
                self.set_state(idx, SlotState::Connected { handle });
                info!("BLE: connected to {} (attempt {})", slot.id, attempt);
                out.push(BleEvent::DeviceConnected(slot.id));
            }
            Err(e) => {
                self.radio.release(handle);
                warn!(
                    "BLE: connect {} attempt {}/{} failed: {}",
                    slot.id, attempt, self.config.connect_attempts, e
                );
                if let Attempt::Exhausted = self.after_failed_attempt(idx, attempt, now_ms) {
                    out.push(BleEvent::ConnectFailed(slot.id));
                }
            }
        }
    }

    fn on_disconnected(&mut self, handle: ConnHandle, now_ms: u64, out: &mut Vec<BleEvent>) {
        let Some(idx) = self.pool.find_by_handle(handle) else {
            debug!("BLE: disconnect for unknown handle {}", handle);
            return;
        };
        let Some(slot) = self.pool.get(idx).copied() else {
            return;
        };
        if let SlotState::Connecting { .. } = slot.state {
            // Link dropped before the attempt resolved.
            self.on_connect_complete(handle, Err(RadioError::ConnectFailed), now_ms, out);
            return;
        }
        self.pool.free(idx);
        info!("BLE: {} disconnected", slot.id);
        out.push(BleEvent::DeviceDisconnected(slot.id));
    }

    fn run_due_retries(&mut self, now_ms: u64, out: &mut Vec<BleEvent>) {
        for idx in self.pool.indices() {
            let Some(slot) = self.pool.get(idx).copied() else {
                continue;
            };
            if let SlotState::Connecting {
                handle: None,
                retry_at_ms,
                ..
            } = slot.state
            {
                if retry_at_ms <= now_ms {
                    if let Attempt::Exhausted = self.attempt(idx, now_ms) {
                        out.push(BleEvent::ConnectFailed(slot.id));
                    }
                }
            }
        }
    }

    /// Fire the next connection attempt for the slot at `idx`.
    fn attempt(&mut self, idx: usize, now_ms: u64) -> Attempt {
        let Some(slot) = self.pool.get(idx).copied() else {
            return Attempt::Cancelled;
        };
        let SlotState::Connecting {
            attempt, cancelled, ..
        } = slot.state
        else {
            return Attempt::InFlight;
        };
        let attempt = attempt.saturating_add(1);

        match self.radio.begin_connect(slot.id, slot.address_type) {
            Ok(handle) => {
                self.set_state(
                    idx,
                    SlotState::Connecting {
                        attempt,
                        handle: Some(handle),
                        retry_at_ms: 0,
                        cancelled,
                    },
                );
                Attempt::InFlight
            }
            Err(e) => {
                warn!(
                    "BLE: connect {} attempt {}/{} rejected: {}",
                    slot.id, attempt, self.config.connect_attempts, e
                );
                self.after_failed_attempt(idx, attempt, now_ms)
            }
        }
    }

    /// Either schedule the next attempt or free the slot.
    fn after_failed_attempt(&mut self, idx: usize, attempt: u8, now_ms: u64) -> Attempt {
        let cancelled = matches!(
            self.pool.get(idx).map(|s| s.state),
            Some(SlotState::Connecting { cancelled: true, .. })
        );
        if cancelled {
            self.pool.free(idx);
            return Attempt::Cancelled;
        }
        if attempt >= self.config.connect_attempts {
            if let Some(slot) = self.pool.free(idx) {
                warn!("BLE: giving up on {} after {} attempts", slot.id, attempt);
            }
            return Attempt::Exhausted;
        }
        self.set_state(
            idx,
            SlotState::Connecting {
                attempt,
                handle: None,
                retry_at_ms: now_ms + u64::from(self.config.connect_backoff_ms),
                cancelled: false,
            },
        );
        Attempt::Retrying
    }

    fn set_state(&mut self, idx: usize, state: SlotState) {
        if let Some(slot) = self.pool.get_mut(idx) {
            slot.state = state;
        }
    }

    fn connected_handle(&self, id: &PeripheralId) -> Option<ConnHandle> {
        match self.slot_state(id)? {
            SlotState::Connected { handle } => Some(handle),
            _ => None,
        }
    }
}
