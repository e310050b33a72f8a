//! Noble wire protocol: JSON text frames.
//!
//! Client → gateway frames carry an `action` tag and parse into [`Command`].
//! Gateway → client frames carry a `type` tag and serialize from [`Reply`].
//!
//! Parsing is strict: an unknown `action`, a missing field, or a malformed
//! value fails, and the bridge drops the frame without answering.

use serde::{Deserialize, Serialize};

use crate::ble::types::{Advertisement, AddressType, BleUuid, CharacteristicInfo, PeripheralId};

// ── Client → gateway ─────────────────────────────────────────

/// A parsed client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Auth {
        response: String,
    },
    StartScanning {
        #[serde(default)]
        duration: u32,
        #[serde(default = "default_active")]
        active: bool,
        /// Accepted for Noble compatibility; repeats are always forwarded.
        #[serde(default)]
        allow_duplicates: bool,
        /// Accepted for Noble compatibility; no filtering is applied.
        #[serde(default)]
        service_uuids: Vec<String>,
    },
    StopScanning,
    Connect {
        peripheral_uuid: PeripheralId,
    },
    DiscoverServices {
        peripheral_uuid: PeripheralId,
    },
    DiscoverCharacteristics {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
    },
    Read {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
    },
    Write {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
        without_response: bool,
    },
    Notify {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
        notify: bool,
    },
}

fn default_active() -> bool {
    true
}

impl Command {
    /// Parse one text frame. `None` for anything that is not a valid command.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Target peripheral of a peripheral command.
    pub fn peripheral(&self) -> Option<PeripheralId> {
        match self {
            Self::Connect { peripheral_uuid }
            | Self::DiscoverServices { peripheral_uuid }
            | Self::DiscoverCharacteristics {
                peripheral_uuid, ..
            }
            | Self::Read {
                peripheral_uuid, ..
            }
            | Self::Write {
                peripheral_uuid, ..
            }
            | Self::Notify {
                peripheral_uuid, ..
            } => Some(*peripheral_uuid),
            Self::Auth { .. } | Self::StartScanning { .. } | Self::StopScanning => None,
        }
    }
}

// ── Gateway → client ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
}

/// Why a `disconnect` reply was sent instead of the expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Another client owns the peripheral.
    #[serde(rename = "denied")]
    Denied,
    /// The client does not own the peripheral, or it is not connected yet.
    #[serde(rename = "not connected")]
    NotConnected,
    /// Discovery returned nothing; ownership was dropped.
    #[serde(rename = "aborted")]
    Aborted,
    /// The connection could not be established.
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementJson {
    pub local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power_level: Option<i8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uuids: Option<Vec<BleUuid>>,
    /// Uppercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicJson {
    pub uuid: BleUuid,
    pub properties: Vec<String>,
}

impl From<&CharacteristicInfo> for CharacteristicJson {
    fn from(c: &CharacteristicInfo) -> Self {
        Self {
            uuid: c.uuid,
            properties: c.properties.names().into_iter().map(String::from).collect(),
        }
    }
}

/// A frame sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Auth {
        challenge: String,
    },
    StateChange {
        state: RadioState,
    },
    Discover {
        peripheral_uuid: PeripheralId,
        address: String,
        address_type: AddressType,
        connectable: bool,
        rssi: i16,
        advertisement: AdvertisementJson,
    },
    Connect {
        peripheral_uuid: PeripheralId,
    },
    Disconnect {
        peripheral_uuid: PeripheralId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DisconnectReason>,
    },
    ServicesDiscover {
        peripheral_uuid: PeripheralId,
        service_uuids: Vec<BleUuid>,
    },
    CharacteristicsDiscover {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristics: Vec<CharacteristicJson>,
    },
    Read {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
        is_notification: bool,
    },
    Write {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
    },
    Notify {
        peripheral_uuid: PeripheralId,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
        state: bool,
    },
}

impl Reply {
    pub fn discover(adv: &Advertisement) -> Self {
        Self::Discover {
            peripheral_uuid: adv.id,
            address: adv.id.address_string(),
            address_type: adv.address_type,
            connectable: adv.connectable,
            rssi: adv.rssi,
            advertisement: AdvertisementJson {
                local_name: adv.local_name.clone().unwrap_or_default(),
                tx_power_level: adv.tx_power_level,
                service_uuids: (!adv.service_uuids.is_empty()).then(|| adv.service_uuids.clone()),
                manufacturer_data: adv.manufacturer_data.as_deref().map(crate::crypto::to_hex),
            },
        }
    }

    pub fn disconnect(id: PeripheralId, reason: DisconnectReason) -> Self {
        Self::Disconnect {
            peripheral_uuid: id,
            reason: Some(reason),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Serde helper: bytes as a hex string (uppercase out, either case in).
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&crate::crypto::to_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        crate::crypto::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
