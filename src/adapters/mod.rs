//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements      | Connects to                     |
//! |--------------|-----------------|---------------------------------|
//! | `btle_radio` | RadioPort       | Host BLE stack via btleplug     |
//! | `sim_radio`  | RadioPort       | Simulated peripherals (default) |
//! | `log_sink`   | EventSink       | `log` output                    |
//! | `nvs`        | ConfigPort      | In-memory NVS-style store       |
//! |              | StoragePort     |                                 |
//! | `settings`   | SettingsPort    | Any StoragePort (`gw` keys)     |
//! | `time`       | TimePort        | `std::time::Instant`            |
//! | `ws_server`  | WsTransport     | tungstenite over TCP            |

#[cfg(feature = "ble-central")]
pub mod btle_radio;
pub mod log_sink;
pub mod nvs;
pub mod settings;
pub mod sim_radio;
pub mod time;
pub(super) mod utils;
pub mod ws_server;
