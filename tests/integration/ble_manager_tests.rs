//! Connection manager scenarios that span several poll iterations.

use std::sync::Arc;

use blegateway::adapters::sim_radio::{SimRadio, BATTERY_LEVEL, BATTERY_SERVICE};
use blegateway::app::ports::RadioPort;
use blegateway::ble::manager::{BleEvent, BleManager, ConnectOutcome, ScanState};
use blegateway::ble::pool::SlotState;
use blegateway::ble::types::{Advertisement, AddressType};
use blegateway::config::GatewayConfig;
use blegateway::events::{RadioEvent, RadioEventQueue, SharedRadioEvents};

use crate::mock_gateway::{tag, HRM, NUS};

fn manager_with(setup: impl FnOnce(&mut SimRadio)) -> (BleManager<SimRadio>, SharedRadioEvents) {
    let events = RadioEventQueue::shared();
    let mut radio = SimRadio::demo(Arc::clone(&events));
    setup(&mut radio);
    let mut ble = BleManager::new(radio, Arc::clone(&events), &GatewayConfig::default());
    assert!(ble.initialize());
    (ble, events)
}

#[test]
fn failed_init_leaves_manager_unusable() {
    let events = RadioEventQueue::shared();
    let mut radio = SimRadio::demo(Arc::clone(&events));
    radio.fail_init();
    let mut ble = BleManager::new(radio, events, &GatewayConfig::default());
    assert!(!ble.initialize());
    assert!(!ble.is_ready());
    assert!(!ble.start_scan(0, true));
    assert_eq!(ble.connect(HRM, 0), ConnectOutcome::Failed);
}

#[test]
fn address_type_cache_keeps_first_sighting() {
    let (mut ble, events) = manager_with(|_| {});
    assert!(ble.start_scan(0, true));
    ble.poll(0);
    assert_eq!(ble.address_type(&HRM), Some(AddressType::Public));
    assert_eq!(ble.address_type(&NUS), Some(AddressType::Random));

    // A later sighting with a different type does not overwrite the cache.
    events.push(RadioEvent::Advertisement(Advertisement::new(
        HRM,
        AddressType::Random,
        -50,
    )));
    ble.poll(10);
    assert_eq!(ble.address_type(&HRM), Some(AddressType::Public));
}

#[test]
fn unknown_address_types_are_not_cached() {
    let (mut ble, events) = manager_with(|_| {});
    assert!(ble.start_scan(0, true));
    ble.poll(0);
    let stranger = blegateway::ble::types::PeripheralId::new([1, 2, 3, 4, 5, 6]);
    events.push(RadioEvent::Advertisement(Advertisement::new(
        stranger,
        AddressType::Unknown,
        -90,
    )));
    let found = ble.poll(10);
    assert!(matches!(found.as_slice(), [BleEvent::DeviceFound(a)] if a.id == stranger));
    assert_eq!(ble.address_type(&stranger), None);
}

#[test]
fn advertisements_after_stop_are_never_delivered() {
    let (mut ble, events) = manager_with(|_| {});
    assert!(ble.start_scan(0, true));
    assert!(ble.stop_scan());
    assert_eq!(ble.scan_state(), ScanState::Idle);
    assert!(ble.poll(0).is_empty());

    // A straggler pushed by the stack after the stop settled.
    events.push(RadioEvent::Advertisement(Advertisement::new(
        NUS,
        AddressType::Random,
        -60,
    )));
    assert!(ble.poll(10).is_empty());
}

#[test]
fn cancel_during_backoff_then_reconnect() {
    let (mut ble, _) = manager_with(|r| r.fail_next_connects(1));
    assert_eq!(ble.connect(NUS, 0), ConnectOutcome::Pending);
    ble.poll(0);
    // Backing off between attempts: cancel drops the slot outright.
    assert!(ble.disconnect(NUS));
    assert_eq!(ble.slot_state(&NUS), None);

    assert_eq!(ble.connect(NUS, 100), ConnectOutcome::Pending);
    let events = ble.poll(100);
    assert_eq!(events, vec![BleEvent::DeviceConnected(NUS)]);
    assert!(ble.is_connected(&NUS));
}

#[test]
fn orphan_link_is_torn_down() {
    let (mut ble, events) = manager_with(|_| {});
    let handle = ble
        .radio_mut()
        .begin_connect(tag(0), AddressType::Random)
        .unwrap();
    assert_eq!(ble.radio().open_links(), 1);
    // The stack already pushed ConnectComplete for a handle no slot knows.
    assert!(!events.is_empty());
    assert!(ble.poll(0).is_empty());
    ble.poll(10);
    assert_eq!(ble.radio().open_links(), 0, "handle {handle} left open");
}

#[test]
fn refused_disconnect_still_frees_the_slot() {
    let (mut ble, _) = manager_with(|_| {});
    ble.connect(HRM, 0);
    ble.poll(0);
    ble.radio_mut().refuse_disconnects(true);
    assert!(!ble.disconnect(HRM));
    assert_eq!(ble.connection_count(), 0);
    assert!(!ble.is_connected(&HRM));
}

#[test]
fn link_loss_during_connect_counts_as_failed_attempt() {
    let (mut ble, events) = manager_with(|_| {});
    assert_eq!(ble.connect(HRM, 0), ConnectOutcome::Pending);
    let handle = match ble.slot_state(&HRM) {
        Some(SlotState::Connecting {
            handle: Some(h), ..
        }) => h,
        other => panic!("unexpected slot state {other:?}"),
    };
    // The completion is lost and the link drops instead.
    events.drain_lifecycle(|_| {});
    events.push(RadioEvent::Disconnected { handle });
    let out = ble.poll(0);
    assert!(out.is_empty());
    assert!(matches!(
        ble.slot_state(&HRM),
        Some(SlotState::Connecting {
            attempt: 1,
            handle: None,
            ..
        })
    ));

    // The retry succeeds after the backoff.
    ble.poll(1_000);
    assert_eq!(ble.poll(1_010), vec![BleEvent::DeviceConnected(HRM)]);
}

#[test]
fn notifications_only_for_connected_slots() {
    let (mut ble, _) = manager_with(|_| {});
    ble.connect(HRM, 0);
    ble.poll(0);
    assert!(ble.notify_characteristic(HRM, BATTERY_SERVICE, BATTERY_LEVEL, true));
    assert!(ble.radio_mut().notify(&HRM, BATTERY_LEVEL, &[42]));
    let out = ble.poll(10);
    assert_eq!(
        out,
        vec![BleEvent::Notification {
            id: HRM,
            service: BATTERY_SERVICE,
            characteristic: BATTERY_LEVEL,
            data: vec![42],
            is_notify: true,
        }]
    );

    assert!(ble.disconnect(HRM));
    assert_eq!(ble.poll(20), vec![BleEvent::DeviceDisconnected(HRM)]);
    assert!(!ble.notify_characteristic(HRM, BATTERY_SERVICE, BATTERY_LEVEL, false));
}
