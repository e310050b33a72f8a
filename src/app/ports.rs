//! Port traits: the hexagonal boundary between gateway logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ BleManager / NobleBridge (core)
//! ```
//!
//! Driven adapters (radio stack, settings, storage, event sinks) implement
//! these traits. The core consumes them via generics, so the connection
//! manager and protocol bridge never touch a real radio or socket directly.
//!
//! ## Security notes
//!
//! - **SettingsPort** exposes the shared AES key; implementations MUST NOT log
//!   it except on first-boot generation.
//! - **ConfigPort** implementations MUST validate before persisting.
//! - All port errors are typed. Callers must handle every variant explicitly.

use crate::ble::types::{AddressType, BleUuid, CharacteristicInfo, ConnHandle, PeripheralId};
use crate::config::{GatewayConfig, ScanParams};
use crate::crypto::Key;
use crate::error::RadioError;

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: core ↔ BLE host stack)
// ───────────────────────────────────────────────────────────────

/// Primitives of the underlying BLE central stack.
///
/// Calls return promptly. Anything that completes later (a timed scan
/// expiring, a connection attempt, a disconnect, a notification) is reported
/// by pushing a [`RadioEvent`](crate::events::RadioEvent) into the shared
/// queue the adapter was constructed with.
pub trait RadioPort {
    /// Bring up the stack and apply scan parameters. Called once.
    fn init(&mut self, params: &ScanParams) -> Result<(), RadioError>;

    /// Start a scan that ends by itself after `window_secs`, then raises
    /// `ScanComplete`.
    fn start_scan(&mut self, window_secs: u32, active: bool) -> Result<(), RadioError>;

    /// Cancel a running scan.
    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Whether the stack is currently scanning.
    fn is_scanning(&self) -> bool;

    /// Drop any scan results the stack buffers internally.
    fn clear_scan_results(&mut self);

    /// Start one connection attempt. The outcome arrives as `ConnectComplete`
    /// carrying the returned handle.
    fn begin_connect(
        &mut self,
        id: PeripheralId,
        address_type: AddressType,
    ) -> Result<ConnHandle, RadioError>;

    /// Free whatever a failed attempt left behind for `handle`.
    fn release(&mut self, handle: ConnHandle);

    /// Request disconnection. Completion arrives as `Disconnected`.
    fn disconnect(&mut self, handle: ConnHandle) -> Result<(), RadioError>;

    /// Primary services of a connected peripheral.
    fn services(&mut self, handle: ConnHandle) -> Result<Vec<BleUuid>, RadioError>;

    /// Characteristics of one service.
    fn characteristics(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
    ) -> Result<Vec<CharacteristicInfo>, RadioError>;

    fn read(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
    ) -> Result<Vec<u8>, RadioError>;

    fn write(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), RadioError>;

    /// Subscribe to (or unsubscribe from) notifications. Values arrive as
    /// `Notification` events.
    fn set_notify(
        &mut self,
        handle: ConnHandle,
        service: BleUuid,
        characteristic: BleUuid,
        enable: bool,
    ) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Settings port (driven adapter: core ← persisted settings)
// ───────────────────────────────────────────────────────────────

/// Read-side view of the persisted gateway settings.
pub trait SettingsPort {
    /// Shared AES-128 key for the auth handshake.
    fn aes_key(&self) -> Key;

    /// Admin password; the auth credential is `admin:<password>`.
    fn admin_password(&self) -> &str;

    /// Human-readable gateway name.
    fn device_name(&self) -> &str;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / diagnostics)
// ───────────────────────────────────────────────────────────────

/// The bridge emits structured [`GatewayEvent`](super::events::GatewayEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::GatewayEvent);
}

// ───────────────────────────────────────────────────────────────
// Time port (driven adapter: core ← monotonic clock)
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds, used for connect backoff deadlines.
pub trait TimePort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: core ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists gateway configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`GatewayConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<GatewayConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &GatewayConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for settings and credentials.
///
/// # Security
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic. No partial writes on power loss.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage failed.
    Storage(StorageError),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Destination buffer is smaller than the stored value.
    BufferTooSmall,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Storage(e) => write!(f, "storage: {}", e),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
