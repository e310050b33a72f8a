//! Outbound operational events.
//!
//! The [`NobleBridge`](crate::noble::bridge::NobleBridge) emits these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log to the console, count them, or record
//! them in tests.

use crate::ble::types::PeripheralId;
use crate::noble::auth::ClientId;
use crate::noble::protocol::DisconnectReason;

/// Structured events emitted by the protocol bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The bridge is serving clients; carries radio readiness.
    Started { radio_ready: bool },

    /// A WebSocket client connected and was sent a challenge.
    ClientConnected(ClientId),

    /// A client answered its challenge correctly.
    ClientAuthenticated(ClientId),

    /// A client's auth response was wrong; a fresh challenge was issued.
    AuthRejected(ClientId),

    /// A client exceeded its command rate and a frame was dropped.
    RateLimited(ClientId),

    /// A client left; `released` peripherals were disconnected on its behalf.
    ClientDisconnected { client: ClientId, released: u8 },

    /// A client now owns a peripheral (connect in flight or done).
    PeripheralClaimed { client: ClientId, id: PeripheralId },

    /// A peripheral's ownership record was removed.
    PeripheralReleased { id: PeripheralId },

    /// A client was refused access to a peripheral.
    AccessRefused {
        client: ClientId,
        id: PeripheralId,
        reason: DisconnectReason,
    },

    /// A shared scan started or stopped.
    ScanChanged { scanning: bool },
}
