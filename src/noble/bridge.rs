//! Protocol Bridge: multiplexes WebSocket clients onto the radio.
//!
//! ```text
//!   WsTransport ──poll()──▶ ┌──────────────┐ ──connect/read/..──▶ BleManager
//!                          │ NobleBridge  │
//!   WsTransport ◀─send()─── └──────────────┘ ◀──────poll()──────── BleManager
//! ```
//!
//! The bridge owns the client table, the ownership table and the
//! [`BleManager`]. [`NobleBridge::service`] is the whole main-loop body: it
//! drains the transport, dispatches commands, then drains radio events and
//! fans them out. Nothing else mutates gateway state.
//!
//! Client lifecycle:
//!
//! ```text
//!   transport connect ─▶ Challenged ──auth ok──▶ Authenticated
//!                          │   ▲                      │
//!                          └───┘ auth fail            │
//!                       (fresh challenge)             ▼
//!                                              transport disconnect
//!                                        (release + disconnect owned)
//! ```
//!
//! Malformed frames, unknown actions and commands from unauthenticated
//! clients are dropped without a reply.

use log::{debug, info, warn};

use super::auth::{ClientId, ClientTable};
use super::ownership::{Claim, OwnershipTable};
use super::protocol::{CharacteristicJson, Command, DisconnectReason, RadioState, Reply};
use super::transport::{TransportEvent, WsTransport};
use crate::app::events::GatewayEvent;
use crate::app::ports::{EventSink, RadioPort, SettingsPort};
use crate::ble::manager::{BleEvent, BleManager, ConnectOutcome};
use crate::ble::types::{BleUuid, PeripheralId};
use crate::crypto::{self, Cipher};

pub struct NobleBridge<R: RadioPort, S: EventSink> {
    ble: BleManager<R>,
    clients: ClientTable,
    owners: OwnershipTable,
    cipher: Cipher,
    credential: String,
    sink: S,
    started: bool,
}

impl<R: RadioPort, S: EventSink> NobleBridge<R, S> {
    pub fn new(ble: BleManager<R>, settings: &impl SettingsPort, sink: S) -> Self {
        Self {
            ble,
            clients: ClientTable::new(),
            owners: OwnershipTable::new(),
            cipher: Cipher::new(&settings.aes_key()),
            credential: format!("admin:{}", settings.admin_password()),
            sink,
            started: false,
        }
    }

    pub fn ble(&self) -> &BleManager<R> {
        &self.ble
    }

    pub fn ble_mut(&mut self) -> &mut BleManager<R> {
        &mut self.ble
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn owners(&self) -> &OwnershipTable {
        &self.owners
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn owner_of(&self, id: &PeripheralId) -> Option<ClientId> {
        self.owners.owner_of(id)
    }

    // ── Main loop body ───────────────────────────────────────

    /// One iteration: transport first, then radio events.
    pub fn service<T: WsTransport>(&mut self, transport: &mut T, now_ms: u64) {
        if !self.started {
            self.started = true;
            self.sink.emit(&GatewayEvent::Started {
                radio_ready: self.ble.is_ready(),
            });
        }

        for event in transport.poll() {
            match event {
                TransportEvent::Connected(client) => self.on_client_connected(transport, client),
                TransportEvent::Text(client, text) => {
                    self.on_text(transport, client, &text, now_ms);
                }
                TransportEvent::Disconnected(client) => {
                    self.on_client_disconnected(transport, client);
                }
            }
        }

        for event in self.ble.poll(now_ms) {
            self.on_ble_event(transport, event);
        }
    }

    // ── Client lifecycle ─────────────────────────────────────

    pub fn on_client_connected<T: WsTransport>(&mut self, transport: &mut T, client: ClientId) {
        let Some(challenge) = self.clients.open(client) else {
            warn!("NOBLE[{}]: client id out of range", client);
            return;
        };
        info!("NOBLE[{}]: connected, challenge issued", client);
        self.sink.emit(&GatewayEvent::ClientConnected(client));
        send(
            transport,
            client,
            &Reply::Auth {
                challenge: crypto::to_hex(&challenge),
            },
        );
    }

    pub fn on_client_disconnected<T: WsTransport>(&mut self, _transport: &mut T, client: ClientId) {
        if !self.clients.close(client) {
            return;
        }

        let freed = self.owners.release_all(client);
        for id in &freed {
            if !self.ble.disconnect(*id) {
                warn!("NOBLE[{}]: radio refused disconnect of {}", client, id);
            }
            self.sink.emit(&GatewayEvent::PeripheralReleased { id: *id });
        }
        info!(
            "NOBLE[{}]: disconnected ({} peripherals released)",
            client,
            freed.len()
        );
        self.sink.emit(&GatewayEvent::ClientDisconnected {
            client,
            released: freed.len() as u8,
        });

        if self.clients.connected() == 0 && self.ble.stop_scan() {
            info!("NOBLE: last client left, scan stopped");
            self.sink.emit(&GatewayEvent::ScanChanged { scanning: false });
        }
    }

    pub fn on_text<T: WsTransport>(
        &mut self,
        transport: &mut T,
        client: ClientId,
        text: &str,
        now_ms: u64,
    ) {
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        if !session.check_rate_limit() {
            warn!("NOBLE[{}]: rate limited, frame dropped", client);
            self.sink.emit(&GatewayEvent::RateLimited(client));
            return;
        }

        let Some(command) = Command::parse(text) else {
            debug!("NOBLE[{}]: unparseable frame dropped", client);
            return;
        };

        match command {
            Command::Auth { response } => self.authenticate(transport, client, &response),
            command if self.clients.is_authenticated(client) => {
                self.dispatch(transport, client, command, now_ms);
            }
            _ => debug!("NOBLE[{}]: command before auth dropped", client),
        }
    }

    fn authenticate<T: WsTransport>(&mut self, transport: &mut T, client: ClientId, response: &str) {
        let Some(session) = self.clients.get_mut(client) else {
            return;
        };
        if session.is_authenticated() {
            debug!("NOBLE[{}]: repeated auth ignored", client);
            return;
        }

        if session.verify(&self.cipher, response, self.credential.as_bytes()) {
            info!("NOBLE[{}]: authenticated", client);
            self.sink.emit(&GatewayEvent::ClientAuthenticated(client));
            let state = if self.ble.is_ready() {
                RadioState::PoweredOn
            } else {
                RadioState::PoweredOff
            };
            send(transport, client, &Reply::StateChange { state });
        } else {
            let challenge = session.rechallenge();
            warn!("NOBLE[{}]: auth failed, re-challenging", client);
            self.sink.emit(&GatewayEvent::AuthRejected(client));
            send(
                transport,
                client,
                &Reply::Auth {
                    challenge: crypto::to_hex(&challenge),
                },
            );
        }
    }

    // ── Command dispatch ─────────────────────────────────────

    fn dispatch<T: WsTransport>(
        &mut self,
        transport: &mut T,
        client: ClientId,
        command: Command,
        now_ms: u64,
    ) {
        match command {
            Command::Auth { .. } => {}
            Command::StartScanning {
                duration, active, ..
            } => {
                if self.ble.start_scan(duration, active) {
                    info!("NOBLE[{}]: scan started ({}s)", client, duration);
                    self.sink.emit(&GatewayEvent::ScanChanged { scanning: true });
                }
            }
            Command::StopScanning => {
                if self.ble.stop_scan() {
                    info!("NOBLE[{}]: scan stopped", client);
                    self.sink.emit(&GatewayEvent::ScanChanged { scanning: false });
                }
            }
            Command::Connect { peripheral_uuid } => {
                self.connect(transport, client, peripheral_uuid, now_ms);
            }
            Command::DiscoverServices { peripheral_uuid } => {
                if !self.check_access(transport, client, peripheral_uuid) {
                    return;
                }
                match self.ble.discover_services(peripheral_uuid) {
                    Some(service_uuids) => send(
                        transport,
                        client,
                        &Reply::ServicesDiscover {
                            peripheral_uuid,
                            service_uuids,
                        },
                    ),
                    None => self.abort(transport, client, peripheral_uuid),
                }
            }
            Command::DiscoverCharacteristics {
                peripheral_uuid,
                service_uuid,
            } => {
                if !self.check_access(transport, client, peripheral_uuid) {
                    return;
                }
                match self.ble.discover_characteristics(peripheral_uuid, service_uuid) {
                    Some(list) => send(
                        transport,
                        client,
                        &Reply::CharacteristicsDiscover {
                            peripheral_uuid,
                            service_uuid,
                            characteristics: list.iter().map(CharacteristicJson::from).collect(),
                        },
                    ),
                    None => self.abort(transport, client, peripheral_uuid),
                }
            }
            Command::Read {
                peripheral_uuid,
                service_uuid,
                characteristic_uuid,
            } => {
                if !self.check_access(transport, client, peripheral_uuid) {
                    return;
                }
                let data = self
                    .ble
                    .read_characteristic(peripheral_uuid, service_uuid, characteristic_uuid)
                    .unwrap_or_default();
                send(
                    transport,
                    client,
                    &Reply::Read {
                        peripheral_uuid,
                        service_uuid,
                        characteristic_uuid,
                        data,
                        is_notification: false,
                    },
                );
            }
            Command::Write {
                peripheral_uuid,
                service_uuid,
                characteristic_uuid,
                data,
                without_response,
            } => {
                if !self.check_access(transport, client, peripheral_uuid) {
                    return;
                }
                if self.ble.write_characteristic(
                    peripheral_uuid,
                    service_uuid,
                    characteristic_uuid,
                    &data,
                    without_response,
                ) {
                    send(
                        transport,
                        client,
                        &Reply::Write {
                            peripheral_uuid,
                            service_uuid,
                            characteristic_uuid,
                        },
                    );
                }
            }
            Command::Notify {
                peripheral_uuid,
                service_uuid,
                characteristic_uuid,
                notify,
            } => {
                if !self.check_access(transport, client, peripheral_uuid) {
                    return;
                }
                if self.ble.notify_characteristic(
                    peripheral_uuid,
                    service_uuid,
                    characteristic_uuid,
                    notify,
                ) {
                    send(
                        transport,
                        client,
                        &Reply::Notify {
                            peripheral_uuid,
                            service_uuid,
                            characteristic_uuid,
                            state: notify,
                        },
                    );
                }
            }
        }
    }

    fn connect<T: WsTransport>(
        &mut self,
        transport: &mut T,
        client: ClientId,
        id: PeripheralId,
        now_ms: u64,
    ) {
        match self.owners.claim(id, client) {
            Claim::Denied(owner) => {
                info!("NOBLE[{}]: {} is owned by client {}", client, id, owner);
                self.refuse(transport, client, id, DisconnectReason::Denied);
                return;
            }
            Claim::Full => {
                warn!("NOBLE[{}]: ownership table full", client);
                self.refuse(transport, client, id, DisconnectReason::Failed);
                return;
            }
            Claim::Claimed => {
                self.sink.emit(&GatewayEvent::PeripheralClaimed { client, id });
            }
            Claim::AlreadyOwned => {}
        }

        match self.ble.connect(id, now_ms) {
            ConnectOutcome::Connected => {
                self.owners.mark_connected(&id);
                send(transport, client, &Reply::Connect { peripheral_uuid: id });
            }
            ConnectOutcome::Pending => debug!("NOBLE[{}]: connect to {} pending", client, id),
            ConnectOutcome::Failed => {
                self.owners.release(&id);
                self.sink.emit(&GatewayEvent::PeripheralReleased { id });
                send(transport, client, &Reply::disconnect(id, DisconnectReason::Failed));
            }
        }
    }

    /// `true` if `client` owns `id` and the link is up. Otherwise replies
    /// "not connected".
    fn check_access<T: WsTransport>(
        &mut self,
        transport: &mut T,
        client: ClientId,
        id: PeripheralId,
    ) -> bool {
        let allowed = self
            .owners
            .get(&id)
            .is_some_and(|s| s.owner == client && s.connected)
            && self.ble.is_connected(&id);
        if !allowed {
            self.refuse(transport, client, id, DisconnectReason::NotConnected);
        }
        allowed
    }

    /// Discovery came back empty: drop the peripheral entirely.
    fn abort<T: WsTransport>(&mut self, transport: &mut T, client: ClientId, id: PeripheralId) {
        warn!("NOBLE[{}]: discovery on {} failed, aborting", client, id);
        self.owners.release(&id);
        self.ble.disconnect(id);
        self.sink.emit(&GatewayEvent::PeripheralReleased { id });
        send(transport, client, &Reply::disconnect(id, DisconnectReason::Aborted));
    }

    fn refuse<T: WsTransport>(
        &mut self,
        transport: &mut T,
        client: ClientId,
        id: PeripheralId,
        reason: DisconnectReason,
    ) {
        self.sink
            .emit(&GatewayEvent::AccessRefused { client, id, reason });
        send(transport, client, &Reply::disconnect(id, reason));
    }

    // ── Radio events ─────────────────────────────────────────

    fn on_ble_event<T: WsTransport>(&mut self, transport: &mut T, event: BleEvent) {
        match event {
            BleEvent::DeviceFound(adv) => {
                let reply = Reply::discover(&adv);
                for client in self.clients.authenticated() {
                    send(transport, client, &reply);
                }
            }
            BleEvent::DeviceConnected(id) => match self.owners.mark_connected(&id) {
                Some(owner) => send(transport, owner, &Reply::Connect { peripheral_uuid: id }),
                None => {
                    info!("NOBLE: {} connected with no owner, disconnecting", id);
                    self.ble.disconnect(id);
                }
            },
            BleEvent::ConnectFailed(id) => {
                if let Some(slot) = self.owners.release(&id) {
                    self.sink.emit(&GatewayEvent::PeripheralReleased { id });
                    send(
                        transport,
                        slot.owner,
                        &Reply::disconnect(id, DisconnectReason::Failed),
                    );
                }
            }
            BleEvent::DeviceDisconnected(id) => {
                if let Some(slot) = self.owners.release(&id) {
                    info!("NOBLE[{}]: link to {} lost", slot.owner, id);
                    self.sink.emit(&GatewayEvent::PeripheralReleased { id });
                    send(
                        transport,
                        slot.owner,
                        &Reply::Disconnect {
                            peripheral_uuid: id,
                            reason: None,
                        },
                    );
                }
            }
            BleEvent::Notification {
                id,
                service,
                characteristic,
                data,
                is_notify,
            } => self.forward_notification(transport, id, service, characteristic, data, is_notify),
        }
    }

    fn forward_notification<T: WsTransport>(
        &mut self,
        transport: &mut T,
        id: PeripheralId,
        service: BleUuid,
        characteristic: BleUuid,
        data: Vec<u8>,
        is_notify: bool,
    ) {
        let Some(owner) = self.owners.get(&id).filter(|s| s.connected).map(|s| s.owner) else {
            return;
        };
        if !is_notify {
            debug!("NOBLE[{}]: indication on {}/{}", owner, id, characteristic);
        }
        send(
            transport,
            owner,
            &Reply::Read {
                peripheral_uuid: id,
                service_uuid: service,
                characteristic_uuid: characteristic,
                data,
                is_notification: true,
            },
        );
    }
}

fn send<T: WsTransport>(transport: &mut T, client: ClientId, reply: &Reply) {
    match reply.to_json() {
        Ok(text) => {
            if let Err(e) = transport.send(client, &text) {
                warn!("NOBLE[{}]: send failed: {}", client, e);
            }
        }
        Err(e) => warn!("NOBLE[{}]: reply serialization failed: {}", client, e),
    }
}
