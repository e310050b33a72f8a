//! Host BLE central adapter built on `btleplug`.
//!
//! Implements [`RadioPort`] for BlueZ, CoreBluetooth and WinRT. `btleplug` is
//! async; this adapter owns a small private tokio runtime and bridges the two
//! worlds the same way the radio contract asks for:
//!
//! - quick calls (start/stop scan, GATT operations) run to completion with
//!   `block_on` under a timeout;
//! - slow or unsolicited work (connection attempts, scan windows, adapter
//!   events, notifications) runs as spawned tasks that push [`RadioEvent`]s
//!   into the shared queue.
//!
//! Connect targets come from a [`Directory`] that outlives scans, with the
//! adapter's own peripheral list as the fallback, so a peripheral the host
//! already knows stays connectable after its scan window closes.
//!
//! A `Disconnected` event is pushed exactly once per handle: whichever of the
//! adapter event pump or the local disconnect task removes the link first
//! reports it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{
    AddressType as BtAddressType, Central, CentralEvent, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::app::ports::RadioPort;
use crate::ble::types::{
    Advertisement, AddressType, BleUuid, CharProperties, CharacteristicInfo, ConnHandle,
    PeripheralId,
};
use crate::config::ScanParams;
use crate::error::RadioError;
use crate::events::{RadioEvent, SharedRadioEvents};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GATT_TIMEOUT: Duration = Duration::from_secs(5);

struct Link {
    id: PeripheralId,
    peripheral: Peripheral,
    connected: bool,
}

type Links = Arc<Mutex<HashMap<ConnHandle, Link>>>;
type Known = Arc<Mutex<Directory<Peripheral>>>;

/// Peripherals seen by this adapter, keyed by address.
///
/// Entries are never dropped when scan results are cleared.
struct Directory<P> {
    entries: HashMap<PeripheralId, P>,
}

impl<P: Clone> Directory<P> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn remember(&mut self, id: PeripheralId, peripheral: P) {
        self.entries.insert(id, peripheral);
    }

    fn get(&self, id: &PeripheralId) -> Option<P> {
        self.entries.get(id).cloned()
    }

    /// Pick `id` out of `candidates` and remember it.
    fn adopt(
        &mut self,
        id: PeripheralId,
        candidates: impl IntoIterator<Item = P>,
        address_of: impl Fn(&P) -> PeripheralId,
    ) -> Option<P> {
        let found = candidates.into_iter().find(|p| address_of(p) == id)?;
        self.remember(id, found.clone());
        Some(found)
    }
}

pub struct BtleRadio {
    runtime: Runtime,
    adapter: Option<Adapter>,
    events: SharedRadioEvents,
    scanning: Arc<AtomicBool>,
    scan_generation: Arc<AtomicU32>,
    known: Known,
    links: Links,
    tasks: HashMap<ConnHandle, JoinHandle<()>>,
    next_handle: ConnHandle,
}

impl BtleRadio {
    pub fn new(events: SharedRadioEvents) -> Result<Self, RadioError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("btle")
            .enable_all()
            .build()
            .map_err(|e| {
                error!("BTLE: runtime start failed: {}", e);
                RadioError::NotReady
            })?;
        Ok(Self {
            runtime,
            adapter: None,
            events,
            scanning: Arc::new(AtomicBool::new(false)),
            scan_generation: Arc::new(AtomicU32::new(0)),
            known: Arc::new(Mutex::new(Directory::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            tasks: HashMap::new(),
            next_handle: 1,
        })
    }

    fn adapter(&self) -> Result<&Adapter, RadioError> {
        self.adapter.as_ref().ok_or(RadioError::NotReady)
    }

    /// Run `fut` on the private runtime under [`GATT_TIMEOUT`].
    fn block<T>(
        &self,
        what: &str,
        fut: impl Future<Output = btleplug::Result<T>>,
    ) -> Result<T, RadioError> {
        match self
            .runtime
            .block_on(async { tokio::time::timeout(GATT_TIMEOUT, fut).await })
        {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                warn!("BTLE: {} failed: {}", what, e);
                Err(RadioError::GattFailed)
            }
            Err(_) => {
                warn!("BTLE: {} timed out", what);
                Err(RadioError::Timeout)
            }
        }
    }

    fn connected_peripheral(&self, handle: ConnHandle) -> Result<Peripheral, RadioError> {
        let links = self.links.lock().map_err(|_| RadioError::NotReady)?;
        links
            .get(&handle)
            .filter(|l| l.connected)
            .map(|l| l.peripheral.clone())
            .ok_or(RadioError::UnknownHandle)
    }

    /// Resolve a peripheral this adapter has not reported yet through the
    /// host stack's own list.
    fn lookup(&self, id: PeripheralId) -> Result<Peripheral, RadioError> {
        let adapter = self.adapter()?.clone();
        let candidates = self.block("peripheral lookup", adapter.peripherals())?;
        self.known
            .lock()
            .map_err(|_| RadioError::NotReady)?
            .adopt(id, candidates, peripheral_id)
            .ok_or_else(|| {
                debug!("BTLE: {} unknown to the host stack", id);
                RadioError::UnknownPeripheral
            })
    }

    fn characteristic(
        peripheral: &Peripheral,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Result<Characteristic, RadioError> {
        let service = to_uuid(service);
        let characteristic = to_uuid(characteristic);
        peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or(RadioError::AttributeNotFound)?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(RadioError::AttributeNotFound)
    }

    fn spawn_event_pump(&self, adapter: Adapter) {
        let events = SharedRadioEvents::clone(&self.events);
        let scanning = Arc::clone(&self.scanning);
        let known = Arc::clone(&self.known);
        let links = Arc::clone(&self.links);

        self.runtime.spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("BTLE: adapter event stream unavailable: {}", e);
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(bt_id) | CentralEvent::DeviceUpdated(bt_id) => {
                        if !scanning.load(Ordering::SeqCst) {
                            continue;
                        }
                        let Ok(peripheral) = adapter.peripheral(&bt_id).await else {
                            continue;
                        };
                        let Ok(Some(props)) = peripheral.properties().await else {
                            continue;
                        };
                        let id = peripheral_id(&peripheral);
                        if let Ok(mut known) = known.lock() {
                            known.remember(id, peripheral.clone());
                        }
                        events.push(RadioEvent::Advertisement(to_advertisement(id, &props)));
                    }
                    CentralEvent::DeviceDisconnected(bt_id) => {
                        let Ok(peripheral) = adapter.peripheral(&bt_id).await else {
                            continue;
                        };
                        let id = peripheral_id(&peripheral);
                        if let Some(handle) = take_link(&links, |l| l.id == id && l.connected) {
                            debug!("BTLE: link to {} lost", id);
                            events.push(RadioEvent::Disconnected { handle });
                        }
                    }
                    _ => {}
                }
            }
            warn!("BTLE: adapter event stream ended");
        });
    }
}

impl RadioPort for BtleRadio {
    fn init(&mut self, params: &ScanParams) -> Result<(), RadioError> {
        let adapter = self.runtime.block_on(async {
            let manager = Manager::new().await.map_err(|e| {
                error!("BTLE: manager unavailable: {}", e);
                RadioError::NotReady
            })?;
            let adapters = manager.adapters().await.map_err(|_| RadioError::NoAdapter)?;
            adapters.into_iter().next().ok_or(RadioError::NoAdapter)
        })?;

        if let Ok(info) = self.runtime.block_on(adapter.adapter_info()) {
            info!("BTLE: using adapter {}", info);
        }
        // The host stack owns scan timing; interval and window are advisory.
        debug!(
            "BTLE: scan params interval={} window={} ignored by host stack",
            params.interval, params.window
        );
        self.spawn_event_pump(adapter.clone());
        self.adapter = Some(adapter);
        Ok(())
    }

    fn start_scan(&mut self, window_secs: u32, _active: bool) -> Result<(), RadioError> {
        let adapter = self.adapter()?.clone();
        self.runtime
            .block_on(adapter.start_scan(ScanFilter::default()))
            .map_err(|e| {
                warn!("BTLE: scan start failed: {}", e);
                RadioError::ScanFailed
            })?;
        self.scanning.store(true, Ordering::SeqCst);
        let generation = self.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let scanning = Arc::clone(&self.scanning);
        let current = Arc::clone(&self.scan_generation);
        let events = SharedRadioEvents::clone(&self.events);
        self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(window_secs))).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let _ = adapter.stop_scan().await;
            if scanning.swap(false, Ordering::SeqCst) {
                events.push(RadioEvent::ScanComplete);
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.scan_generation.fetch_add(1, Ordering::SeqCst);
        let adapter = self.adapter()?.clone();
        let result = self.runtime.block_on(adapter.stop_scan());
        self.scanning.store(false, Ordering::SeqCst);
        result.map_err(|e| {
            warn!("BTLE: scan stop failed: {}", e);
            RadioError::ScanFailed
        })
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    // btleplug buffers nothing per scan on our side, and the directory must
    // keep connect targets.
    fn clear_scan_results(&mut self) {}

    fn begin_connect(
        &mut self,
        id: PeripheralId,
        _address_type: AddressType,
    ) -> Result<ConnHandle, RadioError> {
        let cached = self.known.lock().map_err(|_| RadioError::NotReady)?.get(&id);
        let peripheral = match cached {
            Some(peripheral) => peripheral,
            None => self.lookup(id)?,
        };

        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.links
            .lock()
            .map_err(|_| RadioError::NotReady)?
            .insert(
                handle,
                Link {
                    id,
                    peripheral: peripheral.clone(),
                    connected: false,
                },
            );

        let events = SharedRadioEvents::clone(&self.events);
        let links = Arc::clone(&self.links);
        let task = self.runtime.spawn(async move {
            let attempt = tokio::time::timeout(CONNECT_TIMEOUT, async {
                peripheral.connect().await?;
                peripheral.discover_services().await
            })
            .await;

            match attempt {
                Ok(Ok(())) => {
                    let still_wanted = links
                        .lock()
                        .ok()
                        .and_then(|mut l| l.get_mut(&handle).map(|link| link.connected = true))
                        .is_some();
                    if !still_wanted {
                        let _ = peripheral.disconnect().await;
                        return;
                    }
                    events.push(RadioEvent::ConnectComplete {
                        handle,
                        result: Ok(()),
                    });
                    forward_notifications(&peripheral, handle, &events).await;
                }
                Ok(Err(e)) => {
                    debug!("BTLE: connect to {} failed: {}", id, e);
                    events.push(RadioEvent::ConnectComplete {
                        handle,
                        result: Err(RadioError::ConnectFailed),
                    });
                }
                Err(_) => {
                    debug!("BTLE: connect to {} timed out", id);
                    let _ = peripheral.disconnect().await;
                    events.push(RadioEvent::ConnectComplete {
                        handle,
                        result: Err(RadioError::Timeout),
                    });
                }
            }
        });
        self.tasks.insert(handle, task);
        Ok(handle)
    }

    fn release(&mut self, handle: ConnHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
        let link = self
            .links
            .lock()
            .ok()
            .and_then(|mut l| l.remove(&handle));
        if let Some(link) = link {
            self.runtime.spawn(async move {
                let _ = link.peripheral.disconnect().await;
            });
        }
    }

    fn disconnect(&mut self, handle: ConnHandle) -> Result<(), RadioError> {
        let peripheral = {
            let links = self.links.lock().map_err(|_| RadioError::NotReady)?;
            links
                .get(&handle)
                .map(|l| l.peripheral.clone())
                .ok_or(RadioError::UnknownHandle)?
        };
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }

        let events = SharedRadioEvents::clone(&self.events);
        let links = Arc::clone(&self.links);
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("BTLE: disconnect request failed: {}", e);
            }
            let removed = links.lock().ok().and_then(|mut l| l.remove(&handle));
            if removed.is_some() {
                events.push(RadioEvent::Disconnected { handle });
            }
        });
        Ok(())
    }

    fn services(&mut self, handle: ConnHandle) -> Result<Vec<BleUuid>, RadioError> {
        let peripheral = self.connected_peripheral(handle)?;
        Ok(peripheral
            .services()
            .iter()
            .filter(|s| s.primary)
            .map(|s| from_uuid(s.uuid))
            .collect())
    }

    fn characteristics(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
    ) -> Result<Vec<CharacteristicInfo>, RadioError> {
        let peripheral = self.connected_peripheral(handle)?;
        let wanted = to_uuid(service);
        let svc = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == wanted)
            .ok_or(RadioError::AttributeNotFound)?;
        Ok(svc
            .characteristics
            .iter()
            .map(|c| CharacteristicInfo {
                uuid: from_uuid(c.uuid),
                properties: CharProperties::from_bits(c.properties.bits()),
            })
            .collect())
    }

    fn read(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Result<Vec<u8>, RadioError> {
        let peripheral = self.connected_peripheral(handle)?;
        let c = Self::characteristic(&peripheral, service, characteristic)?;
        self.block("read", peripheral.read(&c))
    }

    fn write(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral(handle)?;
        let c = Self::characteristic(&peripheral, service, characteristic)?;
        let kind = if without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.block("write", peripheral.write(&c, data, kind))
    }

    fn set_notify(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        enable: bool,
    ) -> Result<(), RadioError> {
        let peripheral = self.connected_peripheral(handle)?;
        let c = Self::characteristic(&peripheral, service, characteristic)?;
        if enable {
            self.block("subscribe", peripheral.subscribe(&c))
        } else {
            self.block("unsubscribe", peripheral.unsubscribe(&c))
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────

/// Forward value notifications for `handle` until the stream ends.
async fn forward_notifications(peripheral: &Peripheral, handle: ConnHandle, events: &SharedRadioEvents) {
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("BTLE: notification stream unavailable: {}", e);
            return;
        }
    };
    while let Some(n) = stream.next().await {
        let service = peripheral
            .services()
            .iter()
            .find(|s| s.characteristics.iter().any(|c| c.uuid == n.uuid))
            .map(|s| from_uuid(s.uuid));
        let Some(service) = service else {
            continue;
        };
        events.push(RadioEvent::Notification {
            handle,
            service,
            characteristic: from_uuid(n.uuid),
            data: n.value,
            is_notify: true,
        });
    }
}

/// Remove the first link matching `pred`, returning its handle.
fn take_link(links: &Links, pred: impl Fn(&Link) -> bool) -> Option<ConnHandle> {
    let mut links = links.lock().ok()?;
    let handle = links
        .iter()
        .find(|(_, l)| pred(l))
        .map(|(h, _)| *h)?;
    links.remove(&handle);
    Some(handle)
}

fn to_advertisement(id: PeripheralId, props: &btleplug::api::PeripheralProperties) -> Advertisement {
    let address_type = match props.address_type {
        Some(BtAddressType::Public) => AddressType::Public,
        Some(BtAddressType::Random) => AddressType::Random,
        None => AddressType::Unknown,
    };
    let mut adv = Advertisement::new(id, address_type, props.rssi.unwrap_or(-127));
    adv.local_name = props.local_name.clone();
    adv.tx_power_level = props.tx_power_level.and_then(|p| i8::try_from(p).ok());
    adv.service_uuids = props.services.iter().map(|u| from_uuid(*u)).collect();
    // Noble layout: little-endian company id, then payload.
    adv.manufacturer_data = props
        .manufacturer_data
        .iter()
        .min_by_key(|(company, _)| **company)
        .map(|(company, data)| {
            let mut bytes = company.to_le_bytes().to_vec();
            bytes.extend_from_slice(data);
            bytes
        });
    adv
}

fn peripheral_id(peripheral: &Peripheral) -> PeripheralId {
    PeripheralId::new(peripheral.address().into_inner())
}

fn to_uuid(u: BleUuid) -> uuid::Uuid {
    uuid::Uuid::from_u128(u.as_u128())
}

fn from_uuid(u: uuid::Uuid) -> BleUuid {
    BleUuid::from_u128(u.as_u128())
}
