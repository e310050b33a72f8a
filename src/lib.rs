//! BLE gateway library.
//!
//! Exposes the connection manager, the Noble protocol bridge and the host
//! adapters for integration testing and embedding. The binary in `main.rs`
//! wires them together.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod ble;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod noble;

// Links the std critical-section implementation that backs the radio queue.
#[cfg(not(target_os = "espidf"))]
use critical_section as _;
