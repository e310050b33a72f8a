//! End-to-end protocol tests: WebSocket frames in, WebSocket frames out,
//! through the bridge, the connection manager and the simulated radio.

use blegateway::adapters::sim_radio::{
    BATTERY_SERVICE, BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE, NUS_RX, NUS_SERVICE,
};
use blegateway::app::events::GatewayEvent;
use blegateway::ble::types::PeripheralId;
use blegateway::noble::protocol::{DisconnectReason, RadioState, Reply};
use serde_json::json;

use crate::mock_gateway::{tag, Harness, HRM, NUS};

fn id(p: PeripheralId) -> String {
    p.to_string()
}

fn disconnect(p: PeripheralId, reason: DisconnectReason) -> Reply {
    Reply::Disconnect {
        peripheral_uuid: p,
        reason: Some(reason),
    }
}

// ── Startup and handshake ─────────────────────────────────────

#[test]
fn started_event_is_emitted_once() {
    let mut h = Harness::new();
    h.tick();
    h.tick();
    assert_eq!(
        h.sink()
            .count(|e| matches!(e, GatewayEvent::Started { radio_ready: true })),
        1
    );
}

#[test]
fn new_client_is_challenged() {
    let mut h = Harness::new();
    let challenge = h.open(0);
    assert_eq!(challenge.len(), 32);
    assert!(challenge.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(h.sink().events.contains(&GatewayEvent::ClientConnected(0)));
}

#[test]
fn correct_response_reports_radio_state() {
    let mut h = Harness::new();
    let challenge = h.open(0);
    h.answer(0, &challenge, "admin:s3cret");
    assert_eq!(
        h.ws.take(0),
        vec![Reply::StateChange {
            state: RadioState::PoweredOn
        }]
    );
    assert!(h.bridge.clients().is_authenticated(0));
}

#[test]
fn wrong_response_gets_a_fresh_challenge() {
    let mut h = Harness::new();
    let first = h.open(0);
    h.answer(0, &first, "admin:wrong");

    let second = match h.ws.take(0).as_slice() {
        [Reply::Auth { challenge }] => challenge.clone(),
        other => panic!("expected re-challenge, got {other:?}"),
    };
    assert_ne!(first, second);
    assert!(!h.bridge.clients().is_authenticated(0));
    assert!(h.sink().events.contains(&GatewayEvent::AuthRejected(0)));

    // A correct answer to the stale challenge no longer works.
    h.answer(0, &first, "admin:s3cret");
    let third = match h.ws.take(0).as_slice() {
        [Reply::Auth { challenge }] => challenge.clone(),
        other => panic!("expected re-challenge, got {other:?}"),
    };
    assert!(!h.bridge.clients().is_authenticated(0));

    h.answer(0, &third, "admin:s3cret");
    assert!(matches!(h.ws.take(0).as_slice(), [Reply::StateChange { .. }]));
}

#[test]
fn commands_before_auth_are_dropped() {
    let mut h = Harness::new();
    h.open(0);
    h.send(0, json!({"action": "startScanning"}));
    h.send(0, json!({"action": "connect", "peripheralUuid": id(HRM)}));
    h.tick();
    assert!(h.ws.take(0).is_empty());
    assert!(!h.bridge.ble().is_scanning());
    assert_eq!(h.bridge.owner_of(&HRM), None);
}

#[test]
fn malformed_frames_are_ignored() {
    let mut h = Harness::new();
    h.login(0);
    h.ws.text(0, "not json");
    h.ws.text(0, r#"{"action":"reboot"}"#);
    h.ws.text(0, r#"{"action":"connect"}"#);
    h.ws.text(0, r#"{"action":"connect","peripheralUuid":"xyz"}"#);
    h.tick();
    assert!(h.ws.take(0).is_empty());
    assert!(h.bridge.clients().is_authenticated(0));
}

#[test]
fn repeated_auth_after_success_is_ignored() {
    let mut h = Harness::new();
    h.login(0);
    h.send(0, json!({"action": "auth", "response": "00"}));
    assert!(h.ws.take(0).is_empty());
    assert!(h.bridge.clients().is_authenticated(0));
}

// ── Scanning ──────────────────────────────────────────────────

#[test]
fn discoveries_reach_every_authenticated_client() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.open(2);

    h.send(0, json!({"action": "startScanning"}));
    assert!(h.bridge.ble().is_scanning());

    let seen0 = h.ws.take_json(0);
    let seen1 = h.ws.take_json(1);
    assert_eq!(seen0.len(), 7);
    assert_eq!(seen0, seen1);
    assert!(h.ws.take(2).is_empty(), "unauthenticated client saw a discovery");

    let hrm = seen0
        .iter()
        .find(|f| f["peripheralUuid"] == "aabbccddee01")
        .unwrap();
    assert_eq!(
        *hrm,
        json!({
            "type": "discover",
            "peripheralUuid": "aabbccddee01",
            "address": "aa:bb:cc:dd:ee:01",
            "addressType": "public",
            "connectable": true,
            "rssi": -48,
            "advertisement": {
                "localName": "HRM-Pro",
                "txPowerLevel": 4,
                "serviceUuids": ["180d"]
            }
        })
    );

    let nus = seen0
        .iter()
        .find(|f| f["peripheralUuid"] == "deadbeef0002")
        .unwrap();
    assert_eq!(nus["addressType"], "random");
    assert_eq!(nus["advertisement"]["manufacturerData"], "590001");
    assert!(nus["advertisement"].get("txPowerLevel").is_none());
}

#[test]
fn passive_scan_has_empty_local_names() {
    let mut h = Harness::new();
    h.login(0);
    h.send(0, json!({"action": "startScanning", "active": false, "duration": 3}));
    let frames = h.ws.take_json(0);
    assert!(!frames.is_empty());
    assert!(frames
        .iter()
        .all(|f| f["advertisement"]["localName"] == ""));
}

#[test]
fn continuous_scan_rearms_until_stopped() {
    let mut h = Harness::new();
    h.login(0);
    h.send(0, json!({"action": "startScanning", "allowDuplicates": true}));
    assert_eq!(h.ws.take(0).len(), 7);

    h.radio().expire_scan();
    h.tick();
    assert!(h.bridge.ble().is_scanning());
    h.tick();
    assert_eq!(h.ws.take(0).len(), 7, "re-armed window reports again");

    h.send(0, json!({"action": "stopScanning"}));
    assert!(!h.bridge.ble().is_scanning());
    h.radio().expire_scan();
    h.tick();
    assert!(!h.bridge.ble().is_scanning());
    assert!(h.ws.take(0).is_empty());
}

#[test]
fn timed_scan_ends_by_itself() {
    let mut h = Harness::new();
    h.login(0);
    h.send(0, json!({"action": "startScanning", "duration": 2}));
    h.radio().expire_scan();
    h.tick();
    assert!(!h.bridge.ble().is_scanning());
    assert_eq!(
        h.sink()
            .count(|e| *e == GatewayEvent::ScanChanged { scanning: true }),
        1
    );
}

#[test]
fn second_start_while_scanning_is_ignored() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.send(0, json!({"action": "startScanning"}));
    h.ws.take(0);
    h.ws.take(1);
    h.send(1, json!({"action": "startScanning"}));
    assert!(h.ws.take(0).is_empty());
    assert!(h.ws.take(1).is_empty());
}

#[test]
fn last_client_leaving_stops_the_scan() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.send(0, json!({"action": "startScanning"}));

    h.ws.disconnect(0);
    h.tick();
    assert!(h.bridge.ble().is_scanning(), "one client is still attached");

    h.ws.disconnect(1);
    h.tick();
    assert!(!h.bridge.ble().is_scanning());
}

// ── Connections and ownership ─────────────────────────────────

#[test]
fn connect_replies_once_link_is_up() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    assert!(h.bridge.ble().is_connected(&HRM));
    assert_eq!(h.bridge.owner_of(&HRM), Some(0));

    // Connecting again to an owned, connected peripheral answers at once.
    h.send(0, json!({"action": "connect", "peripheralUuid": id(HRM)}));
    assert_eq!(h.ws.take(0), vec![Reply::Connect { peripheral_uuid: HRM }]);
}

#[test]
fn connect_stops_a_running_scan() {
    let mut h = Harness::new();
    h.login(0);
    h.send(0, json!({"action": "startScanning"}));
    h.ws.take(0);
    h.connect_peripheral(0, NUS);
    assert!(!h.bridge.ble().is_scanning());
}

#[test]
fn racing_connects_first_client_wins() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);

    h.ws.json(0, json!({"action": "connect", "peripheralUuid": id(HRM)}));
    h.ws.json(1, json!({"action": "connect", "peripheralUuid": id(HRM)}));
    h.tick();

    assert_eq!(h.ws.take(0), vec![Reply::Connect { peripheral_uuid: HRM }]);
    assert_eq!(h.ws.take(1), vec![disconnect(HRM, DisconnectReason::Denied)]);
    assert_eq!(h.bridge.owner_of(&HRM), Some(0));
    assert_eq!(h.bridge.ble().connection_count(), 1);
}

#[test]
fn other_clients_cannot_touch_an_owned_peripheral() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.connect_peripheral(0, HRM);

    h.send(
        1,
        json!({
            "action": "read",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": "2a38"
        }),
    );
    assert_eq!(
        h.ws.take(1),
        vec![disconnect(HRM, DisconnectReason::NotConnected)]
    );
    assert!(h.ws.take(0).is_empty());
    assert!(h.bridge.ble().is_connected(&HRM));
}

#[test]
fn gatt_before_connect_is_refused() {
    let mut h = Harness::new();
    h.login(0);
    h.send(
        0,
        json!({"action": "discoverServices", "peripheralUuid": id(HRM)}),
    );
    assert_eq!(
        h.ws.take(0),
        vec![disconnect(HRM, DisconnectReason::NotConnected)]
    );
}

#[test]
fn ownership_table_full_fails_the_connect() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.connect_peripheral(0, NUS);
    for n in 0..3 {
        h.connect_peripheral(0, tag(n));
    }
    h.send(0, json!({"action": "connect", "peripheralUuid": id(tag(3))}));
    assert_eq!(h.ws.take(0), vec![disconnect(tag(3), DisconnectReason::Failed)]);
    assert_eq!(h.bridge.ble().connection_count(), 5);
}

#[test]
fn exhausted_retries_report_failure() {
    let mut h = Harness::with_radio(|r| r.fail_next_connects(100));
    h.login(0);
    h.send(0, json!({"action": "connect", "peripheralUuid": id(NUS)}));
    assert!(h.ws.take(0).is_empty());

    h.advance(6_000);
    assert_eq!(h.ws.take(0), vec![disconnect(NUS, DisconnectReason::Failed)]);
    assert_eq!(h.bridge.owner_of(&NUS), None);
    assert_eq!(h.bridge.ble().connection_count(), 0);
    assert_eq!(h.radio().connect_attempts(), 5);
}

#[test]
fn transient_failure_recovers_on_retry() {
    let mut h = Harness::with_radio(|r| r.fail_next_connects(2));
    h.login(0);
    h.send(0, json!({"action": "connect", "peripheralUuid": id(NUS)}));
    h.advance(2_500);
    assert_eq!(h.ws.take(0), vec![Reply::Connect { peripheral_uuid: NUS }]);
    assert_eq!(h.radio().connect_attempts(), 3);
}

#[test]
fn link_loss_is_reported_without_reason() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);

    assert!(h.radio().drop_link(&HRM));
    h.tick();
    assert_eq!(
        h.ws.take(0),
        vec![Reply::Disconnect {
            peripheral_uuid: HRM,
            reason: None
        }]
    );
    assert_eq!(h.bridge.owner_of(&HRM), None);

    // The peripheral is free for anyone again.
    h.login(1);
    h.connect_peripheral(1, HRM);
}

#[test]
fn client_departure_releases_its_peripherals() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.connect_peripheral(0, HRM);
    h.connect_peripheral(0, NUS);

    h.ws.disconnect(0);
    h.tick();
    h.tick();
    assert_eq!(h.bridge.owner_of(&HRM), None);
    assert_eq!(h.bridge.owner_of(&NUS), None);
    assert_eq!(h.bridge.ble().connection_count(), 0);
    assert_eq!(h.radio().open_links(), 0);
    assert!(h.sink().events.contains(&GatewayEvent::ClientDisconnected {
        client: 0,
        released: 2
    }));

    h.connect_peripheral(1, HRM);
}

#[test]
fn departure_mid_connect_cancels_the_attempt() {
    let mut h = Harness::with_radio(|r| r.fail_next_connects(1));
    h.login(0);
    h.send(0, json!({"action": "connect", "peripheralUuid": id(NUS)}));
    assert!(h.bridge.ble().slot_state(&NUS).is_some());

    h.ws.disconnect(0);
    h.tick();
    h.advance(2_000);
    assert_eq!(h.bridge.ble().connection_count(), 0);
    assert_eq!(h.radio().open_links(), 0);
}

// ── GATT ──────────────────────────────────────────────────────

#[test]
fn discovery_lists_services_and_characteristics() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);

    h.send(
        0,
        json!({"action": "discoverServices", "peripheralUuid": id(HRM)}),
    );
    assert_eq!(
        h.ws.take(0),
        vec![Reply::ServicesDiscover {
            peripheral_uuid: HRM,
            service_uuids: vec![HEART_RATE_SERVICE, BATTERY_SERVICE],
        }]
    );

    h.send(
        0,
        json!({
            "action": "discoverCharacteristics",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d"
        }),
    );
    assert_eq!(
        h.ws.take_json(0),
        vec![json!({
            "type": "characteristicsDiscover",
            "peripheralUuid": "aabbccddee01",
            "serviceUuid": "180d",
            "characteristics": [
                {"uuid": "2a37", "properties": ["notify"]},
                {"uuid": "2a38", "properties": ["read"]}
            ]
        })]
    );
}

#[test]
fn failed_discovery_aborts_the_peripheral() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.radio().hide_services(true);

    h.send(
        0,
        json!({"action": "discoverServices", "peripheralUuid": id(HRM)}),
    );
    assert_eq!(h.ws.take(0), vec![disconnect(HRM, DisconnectReason::Aborted)]);
    assert_eq!(h.bridge.owner_of(&HRM), None);

    h.tick();
    assert!(!h.bridge.ble().is_connected(&HRM));
    assert!(h.ws.take(0).is_empty(), "no second disconnect after abort");
}

#[test]
fn unknown_service_aborts_characteristic_discovery() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.send(
        0,
        json!({
            "action": "discoverCharacteristics",
            "peripheralUuid": id(HRM),
            "serviceUuid": "1234"
        }),
    );
    assert_eq!(h.ws.take(0), vec![disconnect(HRM, DisconnectReason::Aborted)]);
}

#[test]
fn read_returns_hex_value() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.send(
        0,
        json!({
            "action": "read",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180f",
            "characteristicUuid": "2a19"
        }),
    );
    assert_eq!(
        h.ws.take_json(0),
        vec![json!({
            "type": "read",
            "peripheralUuid": "aabbccddee01",
            "serviceUuid": "180f",
            "characteristicUuid": "2a19",
            "data": "5D",
            "isNotification": false
        })]
    );
}

#[test]
fn failed_read_still_answers_with_empty_data() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.send(
        0,
        json!({
            "action": "read",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": "2a37"
        }),
    );
    assert_eq!(
        h.ws.take(0),
        vec![Reply::Read {
            peripheral_uuid: HRM,
            service_uuid: HEART_RATE_SERVICE,
            characteristic_uuid: HEART_RATE_MEASUREMENT,
            data: Vec::new(),
            is_notification: false,
        }]
    );
}

#[test]
fn write_is_acknowledged_and_stored() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, NUS);
    let write = |without_response: bool| {
        json!({
            "action": "write",
            "peripheralUuid": id(NUS),
            "serviceUuid": NUS_SERVICE.to_string(),
            "characteristicUuid": NUS_RX.to_string(),
            "data": "48656c6c6f",
            "withoutResponse": without_response
        })
    };

    h.send(0, write(false));
    h.send(0, write(true));
    let ack = Reply::Write {
        peripheral_uuid: NUS,
        service_uuid: NUS_SERVICE,
        characteristic_uuid: NUS_RX,
    };
    assert_eq!(h.ws.take(0), vec![ack.clone(), ack]);
}

#[test]
fn rejected_write_gets_no_reply() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.send(
        0,
        json!({
            "action": "write",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": "2a38",
            "data": "02",
            "withoutResponse": false
        }),
    );
    assert!(h.ws.take(0).is_empty());
    assert!(h.bridge.ble().is_connected(&HRM));
}

#[test]
fn notifications_flow_to_the_owner_only() {
    let mut h = Harness::new();
    h.login(0);
    h.login(1);
    h.connect_peripheral(0, HRM);

    h.send(
        0,
        json!({
            "action": "notify",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": "2a37",
            "notify": true
        }),
    );
    assert_eq!(
        h.ws.take(0),
        vec![Reply::Notify {
            peripheral_uuid: HRM,
            service_uuid: HEART_RATE_SERVICE,
            characteristic_uuid: HEART_RATE_MEASUREMENT,
            state: true,
        }]
    );
    assert!(h.radio().is_subscribed(&HRM, HEART_RATE_MEASUREMENT));

    assert!(h.radio().notify(&HRM, HEART_RATE_MEASUREMENT, &[0x00, 0x55]));
    h.tick();
    assert_eq!(
        h.ws.take(0),
        vec![Reply::Read {
            peripheral_uuid: HRM,
            service_uuid: HEART_RATE_SERVICE,
            characteristic_uuid: HEART_RATE_MEASUREMENT,
            data: vec![0x00, 0x55],
            is_notification: true,
        }]
    );
    assert!(h.ws.take(1).is_empty());

    h.send(
        0,
        json!({
            "action": "notify",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": "2a37",
            "notify": false
        }),
    );
    h.ws.take(0);
    assert!(!h.radio().notify(&HRM, HEART_RATE_MEASUREMENT, &[0x01]));
}

#[test]
fn notify_on_plain_characteristic_gets_no_reply() {
    let mut h = Harness::new();
    h.login(0);
    h.connect_peripheral(0, HRM);
    h.send(
        0,
        json!({
            "action": "notify",
            "peripheralUuid": id(HRM),
            "serviceUuid": "180d",
            "characteristicUuid": BODY_SENSOR_LOCATION.to_string(),
            "notify": true
        }),
    );
    assert!(h.ws.take(0).is_empty());
    assert!(!h.radio().is_subscribed(&HRM, BODY_SENSOR_LOCATION));
}

// ── Rate limiting ─────────────────────────────────────────────

#[test]
fn burst_beyond_the_bucket_is_dropped() {
    let mut h = Harness::new();
    h.login(0);
    for _ in 0..40 {
        h.ws.json(0, json!({"action": "stopScanning"}));
    }
    h.tick();
    assert!(h.sink().count(|e| *e == GatewayEvent::RateLimited(0)) > 0);
    assert!(h.bridge.clients().is_authenticated(0));
}
