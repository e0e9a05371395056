//! Control core of a battery-powered particulate matter sensor node
//!
//! The node wakes from standby, warms up an SDS011 particulate sensor,
//! samples it together with an optional I2C climate sensor and the battery
//! voltage, and sends a compact tag-length-value record over LoRaWAN before
//! sleeping until the next observation interval.
//!
//! All hardware is reached through the traits of `pm-sensor-hal` and
//! `embedded-hal`/`embedded-io`, so the crate builds and tests on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod battery;
pub mod config;
pub mod device;
pub mod payload;
pub mod sds011;
pub mod sensors;

#[cfg(test)]
mod testing;

pub use battery::{BatteryReading, BatteryState};
pub use config::{BatteryConfig, DeviceConfig, RetryPolicy, Sds011Config, SensorsConfig};
pub use device::{Device, DeviceState, Step};
pub use payload::{EncodeError, Payload, Uplink};
pub use sds011::{PmReading, Sds011, Sds011Error, SensorInfo};
pub use sensors::{Readings, SensorSuite, Sensors, Status, StatusFlag};
