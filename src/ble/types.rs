//! BLE data model shared by the radio layer and the Noble bridge.
//!
//! Every peripheral-indexed table in the gateway is keyed by [`PeripheralId`],
//! the 6-byte link-layer address in display order (`aa:bb:cc:dd:ee:ff` is
//! stored as `[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]`). On the wire it is the
//! lowercase 12-digit hex string `aabbccddeeff`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── PeripheralId ─────────────────────────────────────────────

/// Link-layer address of a peripheral. Immutable, compared byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId([u8; 6]);

impl PeripheralId {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Colon-separated lowercase form, as carried in the `address` field.
    pub fn address_string(&self) -> String {
        let b = self.0;
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Error parsing a wire identifier (peripheral ID or UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseIdError;

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed identifier")
    }
}

impl FromStr for PeripheralId {
    type Err = ParseIdError;

    /// Accepts exactly 12 hex digits in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseIdError)?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeripheralId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeripheralId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Address type ─────────────────────────────────────────────

/// Address-type tag required alongside the address to initiate a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Random,
    Unknown,
}

// ── UUID ─────────────────────────────────────────────────────

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// A service or characteristic UUID, always held in its 128-bit form.
///
/// Display uses Noble's convention: lowercase hex without dashes, and the
/// 4- or 8-digit short form for SIG-assigned UUIDs built on the base UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BleUuid(u128);

impl BleUuid {
    pub const fn from_u128(v: u128) -> Self {
        Self(v)
    }

    pub const fn from_u16(v: u16) -> Self {
        Self(BASE_UUID | ((v as u128) << 96))
    }

    pub const fn from_u32(v: u32) -> Self {
        Self(BASE_UUID | ((v as u128) << 96))
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// The 32-bit alias, if this UUID is built on the Bluetooth base UUID.
    pub const fn short(&self) -> Option<u32> {
        if self.0 & BASE_MASK == BASE_UUID {
            Some((self.0 >> 96) as u32)
        } else {
            None
        }
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short() {
            Some(v) if v <= 0xffff => write!(f, "{v:04x}"),
            Some(v) => write!(f, "{v:08x}"),
            None => write!(f, "{:032x}", self.0),
        }
    }
}

impl FromStr for BleUuid {
    type Err = ParseIdError;

    /// Accepts 4, 8 or 32 hex digits; dashes and a `0x` prefix are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let digits: heapless::String<32> = {
            let mut out = heapless::String::new();
            for c in s.chars().filter(|&c| c != '-') {
                out.push(c).map_err(|_| ParseIdError)?;
            }
            out
        };
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseIdError);
        }
        match digits.len() {
            4 => u16::from_str_radix(&digits, 16)
                .map(Self::from_u16)
                .map_err(|_| ParseIdError),
            8 => u32::from_str_radix(&digits, 16)
                .map(Self::from_u32)
                .map_err(|_| ParseIdError),
            32 => u128::from_str_radix(&digits, 16)
                .map(Self)
                .map_err(|_| ParseIdError),
            _ => Err(ParseIdError),
        }
    }
}

impl Serialize for BleUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BleUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Characteristic properties ────────────────────────────────

/// GATT characteristic property bits (Core spec Vol 3, Part G, 3.3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProperties(u8);

impl CharProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;

    const NAMES: [(u8, &'static str); 8] = [
        (Self::BROADCAST, "broadcast"),
        (Self::READ, "read"),
        (Self::WRITE_WITHOUT_RESPONSE, "writeWithoutResponse"),
        (Self::WRITE, "write"),
        (Self::NOTIFY, "notify"),
        (Self::INDICATE, "indicate"),
        (Self::AUTHENTICATED_SIGNED_WRITES, "authenticatedSignedWrites"),
        (Self::EXTENDED_PROPERTIES, "extendedProperties"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    /// Noble property names, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// A characteristic as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: BleUuid,
    pub properties: CharProperties,
}

// ── Discovery record ─────────────────────────────────────────

/// One advertisement sighting delivered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeripheralId,
    pub address_type: AddressType,
    pub connectable: bool,
    pub rssi: i16,
    pub local_name: Option<String>,
    pub tx_power_level: Option<i8>,
    pub service_uuids: Vec<BleUuid>,
    pub manufacturer_data: Option<Vec<u8>>,
}

impl Advertisement {
    /// Minimal record, mostly useful for tests and the simulated radio.
    pub fn new(id: PeripheralId, address_type: AddressType, rssi: i16) -> Self {
        Self {
            id,
            address_type,
            connectable: true,
            rssi,
            local_name: None,
            tx_power_level: None,
            service_uuids: Vec::new(),
            manufacturer_data: None,
        }
    }
}

/// Opaque radio-stack connection handle. Only the radio layer interprets it.
pub type ConnHandle = u16;
