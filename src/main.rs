//! BLE Gateway entry point.
//!
//! Hexagonal architecture with a single cooperative poll loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WsServer        SimRadio / BtleRadio   NvsAdapter  GwSettings │
//! │  (WsTransport)   (RadioPort)            (Config)    (Settings) │
//! │  LogEventSink    MonotonicClock                                │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │   NobleBridge (auth · ownership · dispatch)            │    │
//! │  │   BleManager  (scan · connect/retry · GATT)            │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  RadioEventQueue (radio context → poll loop)                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Environment overrides, applied on top of the stored config and settings:
//!
//! | Variable               | Effect                                     |
//! |------------------------|--------------------------------------------|
//! | `BLEGW_STATE_FILE`     | settings store, default `blegateway.nvs`   |
//! | `BLEGW_BIND_ADDR`      | WebSocket bind address                     |
//! | `BLEGW_WS_PORT`        | WebSocket port                             |
//! | `BLEGW_NAME`           | gateway name (persisted)                   |
//! | `BLEGW_ADMIN_PASSWORD` | admin password (persisted)                 |
//! | `BLEGW_AES_KEY`        | 32 hex digit AES key (persisted)           |
//! | `RUST_LOG`             | log filter, default `info`                 |
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use blegateway::adapters::log_sink::LogEventSink;
use blegateway::adapters::nvs::{overlay_config, NvsAdapter};
use blegateway::adapters::settings::GwSettings;
use blegateway::adapters::time::MonotonicClock;
use blegateway::adapters::ws_server::WsServer;
use blegateway::app::ports::{ConfigPort, SettingsPort, TimePort};
use blegateway::ble::manager::BleManager;
use blegateway::config::GatewayConfig;
use blegateway::error::Error;
use blegateway::events::RadioEventQueue;
use blegateway::noble::bridge::NobleBridge;

const DEFAULT_STATE_FILE: &str = "blegateway.nvs";

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    for line in banner(&format!("BLE Gateway v{}", env!("CARGO_PKG_VERSION"))) {
        info!("{}", line);
    }

    // ── 2. Config (stored or defaults, then environment) ──────
    let state_file =
        std::env::var("BLEGW_STATE_FILE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_owned());
    let nvs = NvsAdapter::open(&state_file)
        .with_context(|| format!("opening state file {state_file}"))?;
    let mut config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            GatewayConfig::default()
        }
    };
    overlay_config(&mut config, |key| std::env::var(key).ok()).context("gateway config")?;

    // ── 3. Settings (name, password, AES key) ─────────────────
    let mut settings = GwSettings::load(nvs).context("settings unavailable")?;
    if let Ok(name) = std::env::var("BLEGW_NAME") {
        settings.set_device_name(&name).context("BLEGW_NAME")?;
    }
    if let Ok(password) = std::env::var("BLEGW_ADMIN_PASSWORD") {
        settings
            .set_admin_password(&password)
            .context("BLEGW_ADMIN_PASSWORD")?;
    }
    if let Ok(key) = std::env::var("BLEGW_AES_KEY") {
        settings.set_aes_key_hex(&key).context("BLEGW_AES_KEY")?;
    }
    info!("Gateway name: {}", settings.device_name());

    // ── 4. Radio ──────────────────────────────────────────────
    let events = RadioEventQueue::shared();
    let radio = make_radio(&events)?;
    let mut ble = BleManager::new(radio, events, &config);
    if !ble.initialize() {
        error!("Radio initialisation failed, halting");
        return Err(Error::Init("radio").into());
    }

    // ── 5. Bridge + WebSocket server ──────────────────────────
    let mut bridge = NobleBridge::new(ble, &settings, LogEventSink::new());
    let mut server = WsServer::bind(config.ws_bind_addr.as_str(), config.ws_port)
        .map_err(Error::from)
        .with_context(|| format!("binding {}:{}", config.ws_bind_addr, config.ws_port))?;
    let clock = MonotonicClock::new();

    info!("System ready. Entering poll loop.");

    // ── 6. Poll loop ──────────────────────────────────────────
    let tick = Duration::from_millis(u64::from(config.poll_interval_ms));
    loop {
        bridge.service(&mut server, clock.now_ms());
        std::thread::sleep(tick);
    }
}

// ── Startup helpers ───────────────────────────────────────────

const BANNER_WIDTH: usize = 38;

/// Boxed startup banner. Long titles widen the box.
fn banner(title: &str) -> [String; 3] {
    let width = BANNER_WIDTH.max(title.chars().count() + 4);
    let rule = "═".repeat(width);
    [
        format!("╔{rule}╗"),
        format!("║  {title:<inner$}║", inner = width - 2),
        format!("╚{rule}╝"),
    ]
}

#[cfg(feature = "ble-central")]
fn make_radio(
    events: &blegateway::events::SharedRadioEvents,
) -> Result<blegateway::adapters::btle_radio::BtleRadio> {
    info!("Radio: host BLE stack (btleplug)");
    blegateway::adapters::btle_radio::BtleRadio::new(std::sync::Arc::clone(events))
        .map_err(|e| Error::from(e).into())
}

#[cfg(not(feature = "ble-central"))]
fn make_radio(
    events: &blegateway::events::SharedRadioEvents,
) -> Result<blegateway::adapters::sim_radio::SimRadio> {
    info!("Radio: simulated peripherals (build with --features ble-central for hardware)");
    Ok(blegateway::adapters::sim_radio::SimRadio::demo(std::sync::Arc::clone(events)).with_auto_expire())
}
