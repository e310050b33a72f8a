//! Gateway configuration parameters
//!
//! All tunable parameters for the gateway.
//! Values can be overridden via the config store or environment at startup.

use serde::{Deserialize, Serialize};

/// Radio scan parameters, in controller units of 0.625 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Scan interval (0.625 ms units)
    pub interval: u16,
    /// Scan window (0.625 ms units), must not exceed the interval
    pub window: u16,
    /// Request scan responses (active) by default
    pub active: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            interval: 1349, // ~843 ms
            window: 449,    // ~281 ms
            active: true,
        }
    }
}

/// Core gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- WebSocket ---
    /// Address the WebSocket server binds to
    pub ws_bind_addr: heapless::String<46>,
    /// WebSocket listening port
    pub ws_port: u16,

    // --- Scanning ---
    /// Interval/window/active defaults applied at radio init
    pub scan: ScanParams,
    /// Length of each timed scan when scanning indefinitely (seconds)
    pub rearm_window_secs: u32,
    /// Upper bound for `stopScan` to wait for the stack to settle (milliseconds)
    pub stop_settle_timeout_ms: u32,

    // --- Connections ---
    /// Connection attempts before a connect is reported failed
    pub connect_attempts: u8,
    /// Delay between connection attempts (milliseconds)
    pub connect_backoff_ms: u32,

    // --- Timing ---
    /// Main loop sleep between polls (milliseconds)
    pub poll_interval_ms: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut ws_bind_addr = heapless::String::new();
        // "0.0.0.0" fits in 46 bytes.
        let _ = ws_bind_addr.push_str("0.0.0.0");
        Self {
            // WebSocket
            ws_bind_addr,
            ws_port: 80,

            // Scanning
            scan: ScanParams::default(),
            rearm_window_secs: 5,
            stop_settle_timeout_ms: 500,

            // Connections
            connect_attempts: 5,
            connect_backoff_ms: 1000,

            // Timing
            poll_interval_ms: 10, // 100 Hz
        }
    }
}
