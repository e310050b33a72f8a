//! Noble protocol layer: WebSocket clients on one side, the radio on the other.
//!
//! - [`protocol`]: JSON frame types
//! - [`auth`]: per-client challenge state and rate limiting
//! - [`ownership`]: which client owns which peripheral
//! - [`transport`]: the port a WebSocket server implements
//! - [`bridge`]: dispatch and event fan-out

pub mod auth;
pub mod bridge;
pub mod ownership;
pub mod protocol;
pub mod transport;
