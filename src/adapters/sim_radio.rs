//! Simulated radio adapter.
//!
//! Implements [`RadioPort`] over a scripted table of peripherals, each with a
//! small GATT database. Completions are pushed into the event queue inline,
//! so the next `BleManager::poll` sees them, mirroring a host stack that
//! calls back from its own context.
//!
//! Scan windows expire on a timer thread when `auto_expire` is on (host
//! runs). Tests leave it off and call [`SimRadio::expire_scan`] to stay
//! deterministic.
//!
//! Failure injection:
//! - [`SimRadio::fail_init`] makes `init` fail
//! - [`SimRadio::fail_next_connects`] makes the next N attempts complete with an error
//! - [`SimRadio::refuse_disconnects`] makes `disconnect` return an error
//! - [`SimRadio::drop_link`] simulates link loss
//! - [`SimRadio::hide_services`] makes service discovery fail

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{debug, info};

use crate::app::ports::RadioPort;
use crate::ble::types::{
    Advertisement, AddressType, BleUuid, CharProperties, CharacteristicInfo, ConnHandle,
    PeripheralId,
};
use crate::config::ScanParams;
use crate::error::RadioError;
use crate::events::{RadioEvent, SharedRadioEvents};

#[derive(Debug, Clone)]
pub struct SimCharacteristic {
    pub uuid: BleUuid,
    pub properties: CharProperties,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SimService {
    pub uuid: BleUuid,
    pub characteristics: Vec<SimCharacteristic>,
}

#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub advertisement: Advertisement,
    pub services: Vec<SimService>,
}

pub struct SimRadio {
    events: SharedRadioEvents,
    peripherals: Vec<SimPeripheral>,
    auto_expire: bool,
    scanning: Arc<AtomicBool>,
    scan_generation: Arc<AtomicU32>,
    links: HashMap<ConnHandle, PeripheralId>,
    subscriptions: HashSet<(ConnHandle, BleUuid)>,
    next_handle: ConnHandle,
    connect_attempts: u32,
    fail_init: bool,
    failing_connects: u32,
    refuse_disconnects: bool,
    hide_services: bool,
}

impl SimRadio {
    pub fn new(events: SharedRadioEvents, peripherals: Vec<SimPeripheral>) -> Self {
        Self {
            events,
            peripherals,
            auto_expire: false,
            scanning: Arc::new(AtomicBool::new(false)),
            scan_generation: Arc::new(AtomicU32::new(0)),
            links: HashMap::new(),
            subscriptions: HashSet::new(),
            next_handle: 1,
            connect_attempts: 0,
            fail_init: false,
            failing_connects: 0,
            refuse_disconnects: false,
            hide_services: false,
        }
    }

    /// A handful of plausible peripherals, enough to exhaust the pool.
    pub fn demo(events: SharedRadioEvents) -> Self {
        let mut peripherals = vec![heart_rate_sensor(), uart_bridge()];
        for n in 0..5u8 {
            let id = PeripheralId::new([0xc0, 0xff, 0xee, 0x00, 0x00, n]);
            let mut adv = Advertisement::new(id, AddressType::Random, -70 - i16::from(n));
            adv.local_name = Some(format!("tag-{n}"));
            peripherals.push(SimPeripheral {
                advertisement: adv,
                services: vec![battery_service(80 - n)],
            });
        }
        Self::new(events, peripherals)
    }

    /// Expire scan windows on a background timer, like a real stack.
    pub fn with_auto_expire(mut self) -> Self {
        self.auto_expire = true;
        self
    }

    pub fn peripheral_ids(&self) -> Vec<PeripheralId> {
        self.peripherals.iter().map(|p| p.advertisement.id).collect()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn open_links(&self) -> usize {
        self.links.len()
    }

    pub fn is_subscribed(&self, id: &PeripheralId, characteristic: BleUuid) -> bool {
        self.links
            .iter()
            .any(|(h, p)| p == id && self.subscriptions.contains(&(*h, characteristic)))
    }

    // ── Failure injection ────────────────────────────────────

    pub fn fail_init(&mut self) {
        self.fail_init = true;
    }

    pub fn fail_next_connects(&mut self, n: u32) {
        self.failing_connects = n;
    }

    pub fn refuse_disconnects(&mut self, refuse: bool) {
        self.refuse_disconnects = refuse;
    }

    pub fn hide_services(&mut self, hide: bool) {
        self.hide_services = hide;
    }

    /// End the current scan window as the stack's timer would.
    pub fn expire_scan(&self) {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.events.push(RadioEvent::ScanComplete);
        }
    }

    /// Link loss initiated by the peripheral.
    pub fn drop_link(&mut self, id: &PeripheralId) -> bool {
        let Some(handle) = self.handle_of(id) else {
            return false;
        };
        self.links.remove(&handle);
        self.subscriptions.retain(|(h, _)| *h != handle);
        self.events.push(RadioEvent::Disconnected { handle });
        true
    }

    /// Peripheral-side value change. Delivered only if subscribed.
    pub fn notify(&mut self, id: &PeripheralId, characteristic: BleUuid, data: &[u8]) -> bool {
        let Some(handle) = self.handle_of(id) else {
            return false;
        };
        if !self.subscriptions.contains(&(handle, characteristic)) {
            return false;
        }
        let Some(service) = self
            .peripheral(id)
            .and_then(|p| {
                p.services
                    .iter()
                    .find(|s| s.characteristics.iter().any(|c| c.uuid == characteristic))
            })
            .map(|s| s.uuid)
        else {
            return false;
        };
        self.events.push(RadioEvent::Notification {
            handle,
            service,
            characteristic,
            data: data.to_vec(),
            is_notify: true,
        })
    }

    // ── Internals ────────────────────────────────────────────

    fn peripheral(&self, id: &PeripheralId) -> Option<&SimPeripheral> {
        self.peripherals.iter().find(|p| p.advertisement.id == *id)
    }

    fn handle_of(&self, id: &PeripheralId) -> Option<ConnHandle> {
        self.links.iter().find(|(_, p)| *p == id).map(|(h, _)| *h)
    }

    fn linked(&self, handle: ConnHandle) -> Result<&SimPeripheral, RadioError> {
        let id = self.links.get(&handle).ok_or(RadioError::UnknownHandle)?;
        self.peripheral(id).ok_or(RadioError::UnknownPeripheral)
    }

    fn characteristic_mut(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Result<&mut SimCharacteristic, RadioError> {
        let id = *self.links.get(&handle).ok_or(RadioError::UnknownHandle)?;
        self.peripherals
            .iter_mut()
            .find(|p| p.advertisement.id == id)
            .ok_or(RadioError::UnknownPeripheral)?
            .services
            .iter_mut()
            .find(|s| s.uuid == service)
            .ok_or(RadioError::AttributeNotFound)?
            .characteristics
            .iter_mut()
            .find(|c| c.uuid == characteristic)
            .ok_or(RadioError::AttributeNotFound)
    }

    fn alloc_handle(&mut self) -> ConnHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }
}

impl RadioPort for SimRadio {
    fn init(&mut self, params: &ScanParams) -> Result<(), RadioError> {
        if self.fail_init {
            return Err(RadioError::NoAdapter);
        }
        info!(
            "SIM: radio up, {} peripherals (interval={} window={})",
            self.peripherals.len(),
            params.interval,
            params.window
        );
        Ok(())
    }

    fn start_scan(&mut self, window_secs: u32, active: bool) -> Result<(), RadioError> {
        if self.scanning.swap(true, Ordering::SeqCst) {
            return Err(RadioError::ScanFailed);
        }
        let generation = self.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;

        for p in &self.peripherals {
            let mut adv = p.advertisement.clone();
            if !active {
                // Passive scans never see scan-response data.
                adv.local_name = None;
            }
            self.events.push(RadioEvent::Advertisement(adv));
        }

        if self.auto_expire {
            let scanning = Arc::clone(&self.scanning);
            let current = Arc::clone(&self.scan_generation);
            let events = SharedRadioEvents::clone(&self.events);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_secs(u64::from(window_secs)));
                if current.load(Ordering::SeqCst) == generation
                    && scanning.swap(false, Ordering::SeqCst)
                {
                    events.push(RadioEvent::ScanComplete);
                }
            });
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.scan_generation.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn clear_scan_results(&mut self) {}

    fn begin_connect(
        &mut self,
        id: PeripheralId,
        _address_type: AddressType,
    ) -> Result<ConnHandle, RadioError> {
        if self.peripheral(&id).is_none() {
            return Err(RadioError::UnknownPeripheral);
        }
        self.connect_attempts += 1;
        let handle = self.alloc_handle();

        let result = if self.failing_connects > 0 {
            self.failing_connects -= 1;
            Err(RadioError::ConnectFailed)
        } else {
            self.links.insert(handle, id);
            Ok(())
        };
        debug!("SIM: connect {} -> handle {} {:?}", id, handle, result);
        self.events
            .push(RadioEvent::ConnectComplete { handle, result });
        Ok(handle)
    }

    fn release(&mut self, handle: ConnHandle) {
        self.links.remove(&handle);
    }

    fn disconnect(&mut self, handle: ConnHandle) -> Result<(), RadioError> {
        if self.refuse_disconnects {
            return Err(RadioError::NotPermitted);
        }
        if self.links.remove(&handle).is_none() {
            return Err(RadioError::UnknownHandle);
        }
        self.subscriptions.retain(|(h, _)| *h != handle);
        self.events.push(RadioEvent::Disconnected { handle });
        Ok(())
    }

    fn services(&mut self, handle: ConnHandle) -> Result<Vec<BleUuid>, RadioError> {
        if self.hide_services {
            return Err(RadioError::GattFailed);
        }
        Ok(self.linked(handle)?.services.iter().map(|s| s.uuid).collect())
    }

    fn characteristics(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
    ) -> Result<Vec<CharacteristicInfo>, RadioError> {
        let svc = self
            .linked(handle)?
            .services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(RadioError::AttributeNotFound)?;
        Ok(svc
            .characteristics
            .iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                properties: c.properties,
            })
            .collect())
    }

    fn read(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Result<Vec<u8>, RadioError> {
        let c = self.characteristic_mut(handle, service, characteristic)?;
        if !c.properties.contains(CharProperties::READ) {
            return Err(RadioError::NotPermitted);
        }
        Ok(c.value.clone())
    }

    fn write(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), RadioError> {
        let c = self.characteristic_mut(handle, service, characteristic)?;
        let needed = if without_response {
            CharProperties::WRITE_WITHOUT_RESPONSE
        } else {
            CharProperties::WRITE
        };
        if !c.properties.contains(needed) {
            return Err(RadioError::NotPermitted);
        }
        c.value = data.to_vec();
        Ok(())
    }

    fn set_notify(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        enable: bool,
    ) -> Result<(), RadioError> {
        let props = self
            .characteristic_mut(handle, service, characteristic)?
            .properties;
        if !props.contains(CharProperties::NOTIFY) && !props.contains(CharProperties::INDICATE) {
            return Err(RadioError::NotPermitted);
        }
        if enable {
            self.subscriptions.insert((handle, characteristic));
        } else {
            self.subscriptions.remove(&(handle, characteristic));
        }
        Ok(())
    }
}

// ── Demo GATT tables ─────────────────────────────────────────

pub const HEART_RATE_SERVICE: BleUuid = BleUuid::from_u16(0x180d);
pub const HEART_RATE_MEASUREMENT: BleUuid = BleUuid::from_u16(0x2a37);
pub const BODY_SENSOR_LOCATION: BleUuid = BleUuid::from_u16(0x2a38);
pub const BATTERY_SERVICE: BleUuid = BleUuid::from_u16(0x180f);
pub const BATTERY_LEVEL: BleUuid = BleUuid::from_u16(0x2a19);
pub const NUS_SERVICE: BleUuid = BleUuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const NUS_RX: BleUuid = BleUuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const NUS_TX: BleUuid = BleUuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

fn battery_service(level: u8) -> SimService {
    SimService {
        uuid: BATTERY_SERVICE,
        characteristics: vec![SimCharacteristic {
            uuid: BATTERY_LEVEL,
            properties: CharProperties::from_bits(CharProperties::READ | CharProperties::NOTIFY),
            value: vec![level],
        }],
    }
}

fn heart_rate_sensor() -> SimPeripheral {
    let id = PeripheralId::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    let mut adv = Advertisement::new(id, AddressType::Public, -48);
    adv.local_name = Some("HRM-Pro".into());
    adv.tx_power_level = Some(4);
    adv.service_uuids = vec![HEART_RATE_SERVICE];
    SimPeripheral {
        advertisement: adv,
        services: vec![
            SimService {
                uuid: HEART_RATE_SERVICE,
                characteristics: vec![
                    SimCharacteristic {
                        uuid: HEART_RATE_MEASUREMENT,
                        properties: CharProperties::from_bits(CharProperties::NOTIFY),
                        value: vec![0x00, 72],
                    },
                    SimCharacteristic {
                        uuid: BODY_SENSOR_LOCATION,
                        properties: CharProperties::from_bits(CharProperties::READ),
                        value: vec![0x01],
                    },
                ],
            },
            battery_service(93),
        ],
    }
}

fn uart_bridge() -> SimPeripheral {
    let id = PeripheralId::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x02]);
    let mut adv = Advertisement::new(id, AddressType::Random, -66);
    adv.local_name = Some("nus-bridge".into());
    adv.manufacturer_data = Some(vec![0x59, 0x00, 0x01]);
    SimPeripheral {
        advertisement: adv,
        services: vec![SimService {
            uuid: NUS_SERVICE,
            characteristics: vec![
                SimCharacteristic {
                    uuid: NUS_RX,
                    properties: CharProperties::from_bits(
                        CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE,
                    ),
                    value: Vec::new(),
                },
                SimCharacteristic {
                    uuid: NUS_TX,
                    properties: CharProperties::from_bits(CharProperties::NOTIFY),
                    value: Vec::new(),
                },
            ],
        }],
    }
}
