//! Fixed-capacity tables owned by the Radio Connection Manager.
//!
//! - [`ConnectionPool`]: `MAX_CLIENT_CONNECTIONS` slots, each binding a
//!   [`PeripheralId`] to a radio connection handle. Lookups are linear scans;
//!   the pool is tiny and a stable iteration order keeps tests deterministic.
//! - [`AddressTypeCache`]: remembers the address type seen while scanning so a
//!   later connect can be issued without re-scanning.
//!
//! Invariant: a `PeripheralId` occupies at most one slot. [`ConnectionPool::allocate`]
//! refuses duplicates.

use heapless::Deque;

use super::types::{AddressType, ConnHandle, PeripheralId};

// ── Constants ────────────────────────────────────────────────

/// Maximum number of concurrent peripheral connections.
pub const MAX_CLIENT_CONNECTIONS: usize = 5;

/// Maximum number of remembered address types.
pub const ADDRESS_CACHE_CAPACITY: usize = 128;

// ── Connection slots ─────────────────────────────────────────

/// Lifecycle of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// A connect is in progress. `handle` is set while an attempt is in
    /// flight at the radio; `None` means the slot is waiting out its backoff
    /// until `retry_at_ms`.
    Connecting {
        attempt: u8,
        handle: Option<ConnHandle>,
        retry_at_ms: u64,
        cancelled: bool,
    },
    /// Link established.
    Connected { handle: ConnHandle },
    /// Disconnect requested; the slot is released when the radio confirms.
    Disconnecting { handle: ConnHandle },
}

impl SlotState {
    /// Handle currently bound to this slot at the radio, if any.
    pub const fn handle(&self) -> Option<ConnHandle> {
        match *self {
            Self::Connecting { handle, .. } => handle,
            Self::Connected { handle } | Self::Disconnecting { handle } => Some(handle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSlot {
    pub id: PeripheralId,
    pub address_type: AddressType,
    pub state: SlotState,
}

/// Fixed-size arena of connection slots.
pub struct ConnectionPool {
    slots: [Option<ConnectionSlot>; MAX_CLIENT_CONNECTIONS],
}

impl ConnectionPool {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_CLIENT_CONNECTIONS],
        }
    }

    /// Index of the slot holding `id`.
    pub fn find(&self, id: &PeripheralId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.id == *id))
    }

    /// Index of the slot currently bound to `handle` at the radio.
    pub fn find_by_handle(&self, handle: ConnHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.state.handle() == Some(handle)))
    }

    pub fn get(&self, idx: usize) -> Option<&ConnectionSlot> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    /// Place `slot` in the first free position. Returns `None` when the pool
    /// is full or the peripheral already has a slot.
    pub fn allocate(&mut self, slot: ConnectionSlot) -> Option<usize> {
        if self.find(&slot.id).is_some() {
            return None;
        }
        let idx = self.slots.iter().position(Option::is_none)?;
        self.slots[idx] = Some(slot);
        Some(idx)
    }

    /// Empty the slot at `idx`, returning what it held.
    pub fn free(&mut self, idx: usize) -> Option<ConnectionSlot> {
        self.slots.get_mut(idx).and_then(Option::take)
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.occupied() == MAX_CLIENT_CONNECTIONS
    }

    /// Indices of occupied slots, in slot order.
    pub fn indices(&self) -> heapless::Vec<usize, MAX_CLIENT_CONNECTIONS> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

// ── Address-type cache ───────────────────────────────────────

/// Insertion-ordered PeripheralId → AddressType map. When full, the oldest
/// entry is evicted. Lives for the whole process; scan start/stop never
/// clears it.
pub struct AddressTypeCache {
    entries: Deque<(PeripheralId, AddressType), ADDRESS_CACHE_CAPACITY>,
}

impl AddressTypeCache {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    pub fn get(&self, id: &PeripheralId) -> Option<AddressType> {
        self.entries
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, t)| *t)
    }

    /// Record `id` the first time it is seen. Returns `true` if it was new.
    pub fn insert_if_absent(&mut self, id: PeripheralId, address_type: AddressType) -> bool {
        if self.get(&id).is_some() {
            return false;
        }
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // Capacity was just ensured.
        let _ = self.entries.push_back((id, address_type));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AddressTypeCache {
    fn default() -> Self {
        Self::new()
    }
}
