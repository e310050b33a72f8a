//! Transport abstraction: a message-oriented, multi-client server.
//!
//! Concrete implementations:
//! - `WsServer`: tungstenite over non-blocking TCP
//! - an in-memory mock in the integration tests
//!
//! The bridge is generic over `WsTransport`, so it never touches a socket.

use crate::error::TransportError;

use super::auth::ClientId;

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ClientId),
    Text(ClientId, String),
    Disconnected(ClientId),
}

/// Multi-client text-frame transport.
pub trait WsTransport {
    /// Accept new clients and read ready frames. Never blocks.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Send one text frame to `client`.
    fn send(&mut self, client: ClientId, text: &str) -> Result<(), TransportError>;
}
