//! BLE central side: identifiers, connection pool and the connection manager.

pub mod manager;
pub mod pool;
pub mod types;
