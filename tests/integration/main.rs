//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulated radio and a scripted WebSocket transport. All tests
//! run on the host with no Bluetooth adapter required.

mod auth_tests;
mod ble_manager_tests;
mod mock_gateway;
mod noble_bridge_tests;
