//! Bluetooth Low Energy driver for cardswap
//!
//! Implements [`cardswap_core::BleDriver`] on top of the local adapter so an
//! [`cardswap_core::ExchangeCoordinator`] can swap cards with a real device.
//!
//! ## Platform support
//!
//! - Scanning, connecting and reading use btleplug on every platform
//! - Advertising and the GATT server use bluer (BlueZ) on Linux
//! - Elsewhere the peripheral operations fail with `FeatureUnsupported`,
//!   which limits the device to take-only exchanges

pub mod advertising;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod peer;
pub mod requests;

pub use config::BleDriverConfig;
pub use driver::PlatformDriver;
pub use error::BleDriverError;
