//! Application boundary: port traits and operational events.
//!
//! The connection manager and the protocol bridge only see the outside
//! world through the traits in [`ports`]: the radio stack, settings,
//! storage, config and the event sink. Adapters live in `crate::adapters`.

pub mod events;
pub mod ports;
