//! Session layer for a single-service BLE exchange.
//!
//! A [`CentralSession`] scans for, connects to and talks with one remote
//! peripheral; a [`PeripheralSession`] advertises the service and answers
//! read/write requests from any number of connected centrals. Both sit on
//! top of a radio stack injected through the [`api::central::CentralManager`]
//! and [`api::peripheral::PeripheralManager`] traits.

pub mod api;
pub mod bridge;
pub mod config;
mod error;
pub mod loopback;
pub mod session;

pub use error::{Error, ErrorType, Result};
pub use session::central::{CentralSession, ConnectionState};
pub use session::peripheral::{
    AdvertisingState, CharacteristicHandler, ConnectedDevices, FnHandler, PeripheralSession,
};
