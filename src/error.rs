//! Unified error types for the gateway.
//!
//! A single `Error` enum that every subsystem converts into, so the startup
//! path in `main` handles failures uniformly. All variants are `Copy` so they
//! can be stored in connection slots and events without allocation.
//!
//! The Radio Connection Manager and Protocol Bridge never surface these across
//! their public boundary: they translate failures into booleans, options and
//! protocol events. The types here describe *why* at the port level and feed
//! the logs.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level gateway error
// ---------------------------------------------------------------------------

/// Every fallible operation in the gateway funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The radio stack rejected or failed an operation.
    Radio(RadioError),
    /// The WebSocket transport failed.
    Transport(TransportError),
    /// A cryptographic operation received invalid input.
    Crypto(CryptoError),
    /// Startup of a subsystem failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Radio stack errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The stack has not been initialised (or failed to).
    NotReady,
    /// No adapter / controller is available.
    NoAdapter,
    /// The stack refused to start or stop a scan.
    ScanFailed,
    /// A single connection attempt failed.
    ConnectFailed,
    /// The handle does not refer to a live connection.
    UnknownHandle,
    /// The peripheral is not known to the stack.
    UnknownPeripheral,
    /// The requested service or characteristic does not exist.
    AttributeNotFound,
    /// The characteristic does not support the requested operation.
    NotPermitted,
    /// A GATT procedure failed on the link.
    GattFailed,
    /// The operation did not complete in time.
    Timeout,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "radio not ready"),
            Self::NoAdapter => write!(f, "no BLE adapter"),
            Self::ScanFailed => write!(f, "scan request failed"),
            Self::ConnectFailed => write!(f, "connection attempt failed"),
            Self::UnknownHandle => write!(f, "unknown connection handle"),
            Self::UnknownPeripheral => write!(f, "unknown peripheral"),
            Self::AttributeNotFound => write!(f, "attribute not found"),
            Self::NotPermitted => write!(f, "operation not permitted"),
            Self::GattFailed => write!(f, "GATT procedure failed"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The listening socket could not be bound.
    BindFailed,
    /// The client handle does not refer to a live connection.
    UnknownClient,
    /// Writing a frame to the client failed.
    SendFailed,
    /// Accepting a new connection failed.
    AcceptFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindFailed => write!(f, "bind failed"),
            Self::UnknownClient => write!(f, "unknown client"),
            Self::SendFailed => write!(f, "send failed"),
            Self::AcceptFailed => write!(f, "accept failed"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Crypto errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Input was not valid hexadecimal.
    InvalidHex,
    /// Key material has the wrong length.
    InvalidKeyLength,
    /// Ciphertext is empty or not a whole number of blocks.
    InvalidLength,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex => write!(f, "invalid hex"),
            Self::InvalidKeyLength => write!(f, "invalid key length"),
            Self::InvalidLength => write!(f, "ciphertext length not a block multiple"),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
