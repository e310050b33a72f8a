//! Peripheral ownership: which client may issue GATT commands where.
//!
//! A slot is claimed when a client asks to connect and lives until the
//! client leaves, the link drops, or the connect fails. Capacity matches the
//! connection pool, so a claim can only fail when the radio would refuse too.

use crate::ble::pool::MAX_CLIENT_CONNECTIONS;
use crate::ble::types::PeripheralId;

use super::auth::ClientId;

pub const MAX_OWNERSHIP_SLOTS: usize = MAX_CLIENT_CONNECTIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipSlot {
    pub id: PeripheralId,
    pub owner: ClientId,
    /// `false` while the connect is still in flight.
    pub connected: bool,
}

/// Result of [`OwnershipTable::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// New record created for the requester.
    Claimed,
    /// The requester already owned it.
    AlreadyOwned,
    /// Another client owns it.
    Denied(ClientId),
    /// No free slot.
    Full,
}

pub struct OwnershipTable {
    slots: [Option<OwnershipSlot>; MAX_OWNERSHIP_SLOTS],
}

impl OwnershipTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_OWNERSHIP_SLOTS],
        }
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&OwnershipSlot> {
        self.slots.iter().flatten().find(|s| s.id == *id)
    }

    pub fn owner_of(&self, id: &PeripheralId) -> Option<ClientId> {
        self.get(id).map(|s| s.owner)
    }

    pub fn claim(&mut self, id: PeripheralId, client: ClientId) -> Claim {
        if let Some(slot) = self.get(&id) {
            return if slot.owner == client {
                Claim::AlreadyOwned
            } else {
                Claim::Denied(slot.owner)
            };
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(free) => {
                *free = Some(OwnershipSlot {
                    id,
                    owner: client,
                    connected: false,
                });
                Claim::Claimed
            }
            None => Claim::Full,
        }
    }

    /// Record that the link behind `id` is up. Returns the owner, if any.
    pub fn mark_connected(&mut self, id: &PeripheralId) -> Option<ClientId> {
        let slot = self.slots.iter_mut().flatten().find(|s| s.id == *id)?;
        slot.connected = true;
        Some(slot.owner)
    }

    pub fn release(&mut self, id: &PeripheralId) -> Option<OwnershipSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.is_some_and(|s| s.id == *id))?
            .take()
    }

    /// Drop every record owned by `client`, returning the peripherals freed.
    pub fn release_all(
        &mut self,
        client: ClientId,
    ) -> heapless::Vec<PeripheralId, MAX_OWNERSHIP_SLOTS> {
        let mut freed = heapless::Vec::new();
        for slot in &mut self.slots {
            if slot.is_some_and(|s| s.owner == client) {
                if let Some(s) = slot.take() {
                    // Capacity equals the slot count.
                    let _ = freed.push(s.id);
                }
            }
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OwnershipTable {
    fn default() -> Self {
        Self::new()
    }
}
