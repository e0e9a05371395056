//! Hardware abstraction traits for the particulate matter sensor node
//!
//! This crate defines the collaborators the control core drives: the
//! LoRaWAN radio, the real-time clock, the auxiliary climate sensors, the
//! battery ADC channel and the serial port of the particulate sensor.
//! Board support packages implement these traits.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod battery;
pub mod climate;
pub mod radio;
pub mod rtc;
pub mod serial;

pub use battery::BatteryMonitor;
pub use climate::{Absent, ClimateSensor, HeatedSensor, PressureSensor};
pub use radio::{Radio, RadioEvent, TxFlags, UplinkId};
pub use rtc::{Rtc, Timestamp};
pub use serial::SerialPort;
