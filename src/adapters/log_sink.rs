//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each [`GatewayEvent`] through the
//! `log` facade. A metrics or MQTT adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::GatewayEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`GatewayEvent`].
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Started { radio_ready } => {
                info!(
                    "START | radio={}",
                    if *radio_ready { "poweredOn" } else { "poweredOff" }
                );
            }
            GatewayEvent::ClientConnected(client) => info!("CLIENT | {} connected", client),
            GatewayEvent::ClientAuthenticated(client) => {
                info!("CLIENT | {} authenticated", client);
            }
            GatewayEvent::AuthRejected(client) => warn!("CLIENT | {} auth rejected", client),
            GatewayEvent::RateLimited(client) => warn!("CLIENT | {} rate limited", client),
            GatewayEvent::ClientDisconnected { client, released } => {
                info!("CLIENT | {} left, released={}", client, released);
            }
            GatewayEvent::PeripheralClaimed { client, id } => {
                info!("OWNER | {} claimed by {}", id, client);
            }
            GatewayEvent::PeripheralReleased { id } => info!("OWNER | {} released", id),
            GatewayEvent::AccessRefused { client, id, reason } => {
                info!("OWNER | {} refused {} ({:?})", client, id, reason);
            }
            GatewayEvent::ScanChanged { scanning } => {
                info!("SCAN | {}", if *scanning { "on" } else { "off" });
            }
        }
    }
}
