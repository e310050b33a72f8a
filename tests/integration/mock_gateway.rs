//! Mock adapters and a test harness for the gateway core.
//!
//! `MockTransport` scripts inbound WebSocket events and records every frame
//! sent back; `RecordingSink` keeps the bridge's operational events. The
//! `Harness` wires both to a real `BleManager` over the simulated radio and
//! drives it with an explicit millisecond clock.

use std::collections::VecDeque;

use blegateway::adapters::sim_radio::SimRadio;
use blegateway::app::events::GatewayEvent;
use blegateway::app::ports::{EventSink, SettingsPort};
use blegateway::ble::manager::BleManager;
use blegateway::ble::types::PeripheralId;
use blegateway::config::GatewayConfig;
use blegateway::crypto::{Cipher, Key};
use blegateway::error::TransportError;
use blegateway::events::RadioEventQueue;
use blegateway::noble::auth::{encrypt_response, parse_challenge, ClientId, MAX_WS_CLIENTS};
use blegateway::noble::bridge::NobleBridge;
use blegateway::noble::protocol::Reply;
use blegateway::noble::transport::{TransportEvent, WsTransport};
use serde_json::Value;

pub const TEST_KEY: Key = *b"gateway-test-key";
pub const TEST_PASSWORD: &str = "s3cret";

pub const HRM: PeripheralId = PeripheralId::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
pub const NUS: PeripheralId = PeripheralId::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x02]);

pub fn tag(n: u8) -> PeripheralId {
    PeripheralId::new([0xc0, 0xff, 0xee, 0x00, 0x00, n])
}

// ── MockTransport ─────────────────────────────────────────────

pub struct MockTransport {
    inbound: VecDeque<TransportEvent>,
    sent: Vec<(ClientId, String)>,
    open: [bool; MAX_WS_CLIENTS],
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            sent: Vec::new(),
            open: [false; MAX_WS_CLIENTS],
        }
    }

    pub fn connect(&mut self, client: ClientId) {
        self.open[client as usize] = true;
        self.inbound.push_back(TransportEvent::Connected(client));
    }

    pub fn disconnect(&mut self, client: ClientId) {
        self.open[client as usize] = false;
        self.inbound.push_back(TransportEvent::Disconnected(client));
    }

    pub fn text(&mut self, client: ClientId, text: &str) {
        self.inbound
            .push_back(TransportEvent::Text(client, text.to_owned()));
    }

    pub fn json(&mut self, client: ClientId, value: Value) {
        self.text(client, &value.to_string());
    }

    /// Frames sent to `client` since the last take, parsed as replies.
    pub fn take(&mut self, client: ClientId) -> Vec<Reply> {
        self.take_raw(client)
            .iter()
            .map(|text| serde_json::from_str(text).expect("gateway sent an invalid frame"))
            .collect()
    }

    /// Frames sent to `client` since the last take, as JSON values.
    pub fn take_json(&mut self, client: ClientId) -> Vec<Value> {
        self.take_raw(client)
            .iter()
            .map(|text| serde_json::from_str(text).expect("gateway sent invalid JSON"))
            .collect()
    }

    pub fn take_raw(&mut self, client: ClientId) -> Vec<String> {
        let (mine, rest): (Vec<_>, Vec<_>) =
            self.sent.drain(..).partition(|(c, _)| *c == client);
        self.sent = rest;
        mine.into_iter().map(|(_, text)| text).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }
}

impl WsTransport for MockTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        self.inbound.drain(..).collect()
    }

    fn send(&mut self, client: ClientId, text: &str) -> Result<(), TransportError> {
        if !self.open.get(client as usize).copied().unwrap_or(false) {
            return Err(TransportError::UnknownClient);
        }
        self.sent.push((client, text.to_owned()));
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<GatewayEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&GatewayEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &GatewayEvent) {
        self.events.push(event.clone());
    }
}

// ── Settings ──────────────────────────────────────────────────

pub struct FixedSettings;

impl SettingsPort for FixedSettings {
    fn aes_key(&self) -> Key {
        TEST_KEY
    }

    fn admin_password(&self) -> &str {
        TEST_PASSWORD
    }

    fn device_name(&self) -> &str {
        "test-gw"
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub bridge: NobleBridge<SimRadio, RecordingSink>,
    pub ws: MockTransport,
    pub now_ms: u64,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_radio(|_| {})
    }

    /// Build with a chance to inject failures into the radio first.
    pub fn with_radio(setup: impl FnOnce(&mut SimRadio)) -> Self {
        let events = RadioEventQueue::shared();
        let mut radio = SimRadio::demo(std::sync::Arc::clone(&events));
        setup(&mut radio);
        let mut ble = BleManager::new(radio, events, &GatewayConfig::default());
        ble.initialize();
        Self {
            bridge: NobleBridge::new(ble, &FixedSettings, RecordingSink::default()),
            ws: MockTransport::new(),
            now_ms: 0,
        }
    }

    pub fn tick(&mut self) {
        self.bridge.service(&mut self.ws, self.now_ms);
    }

    /// Advance the clock in poll-sized steps, servicing each one.
    pub fn advance(&mut self, ms: u64) {
        let end = self.now_ms + ms;
        while self.now_ms < end {
            self.now_ms = (self.now_ms + 10).min(end);
            self.tick();
        }
    }

    pub fn radio(&mut self) -> &mut SimRadio {
        self.bridge.ble_mut().radio_mut()
    }

    pub fn sink(&self) -> &RecordingSink {
        self.bridge.sink()
    }

    /// Connect `client` and return the hex challenge it was sent.
    pub fn open(&mut self, client: ClientId) -> String {
        self.ws.connect(client);
        self.tick();
        match self.ws.take(client).as_slice() {
            [Reply::Auth { challenge }] => challenge.clone(),
            other => panic!("expected a single auth frame, got {other:?}"),
        }
    }

    pub fn answer(&mut self, client: ClientId, challenge: &str, credential: &str) {
        let iv = parse_challenge(challenge).expect("challenge must be 32 hex digits");
        let response = encrypt_response(&Cipher::new(&TEST_KEY), &iv, credential.as_bytes());
        self.ws
            .json(client, serde_json::json!({"action": "auth", "response": response}));
        self.tick();
    }

    /// Connect and authenticate `client`, consuming the handshake frames.
    pub fn login(&mut self, client: ClientId) {
        let challenge = self.open(client);
        self.answer(client, &challenge, &format!("admin:{TEST_PASSWORD}"));
        let frames = self.ws.take(client);
        assert!(
            matches!(frames.as_slice(), [Reply::StateChange { .. }]),
            "login of client {client} failed: {frames:?}"
        );
    }

    pub fn send(&mut self, client: ClientId, value: Value) {
        self.ws.json(client, value);
        self.tick();
    }

    /// Connect `client` to `id` and wait for the `connect` reply.
    pub fn connect_peripheral(&mut self, client: ClientId, id: PeripheralId) {
        self.send(
            client,
            serde_json::json!({"action": "connect", "peripheralUuid": id.to_string()}),
        );
        self.tick();
        let frames = self.ws.take(client);
        assert_eq!(
            frames,
            vec![Reply::Connect { peripheral_uuid: id }],
            "connect of {id} by client {client}"
        );
    }
}
