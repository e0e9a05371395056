//! Uplink payload format
//!
//! ```text
//! version(1) status(1) [tag(1) value(n)]...
//! ```
//!
//! | tag    | field       | value                                  |
//! |--------|-------------|----------------------------------------|
//! | `0x01` | battery     | u8, `round(V * 100) - 256`             |
//! | `0x10` | temperature | i16 BE, `round(°C * 100)`              |
//! | `0x11` | humidity    | u8, %                                  |
//! | `0x12` | pressure    | i16 BE, `round(hPa * 10)`              |
//! | `0x50` | PM2.5       | i16 BE, `round(µg/m³ * 10)`            |
//! | `0x51` | PM10        | i16 BE, `round(µg/m³ * 10)`            |
//!
//! Fields appear in the order above and only when their source is valid;
//! there is no zero filling.

use core::fmt;

use heapless::Vec;

use crate::sensors::{Readings, Status, StatusFlag};

/// Payload format version
pub const PAYLOAD_VERSION: u8 = 2;
/// Largest possible payload
pub const MAX_PAYLOAD_LEN: usize = 18;

/// Battery voltage tag
pub const TAG_BATTERY: u8 = 0x01;
/// Temperature tag
pub const TAG_TEMPERATURE: u8 = 0x10;
/// Humidity tag
pub const TAG_HUMIDITY: u8 = 0x11;
/// Pressure tag
pub const TAG_PRESSURE: u8 = 0x12;
/// PM2.5 tag
pub const TAG_PM25: u8 = 0x50;
/// PM10 tag
pub const TAG_PM10: u8 = 0x51;

/// Voltage above which a battery reading is sent
const BATTERY_MIN_VOLTS: f64 = 2.55;
/// Battery byte offset, in 10 mV
const BATTERY_OFFSET: i32 = 256;

/// Encoded uplink
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Encoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// Fields exceed the payload buffer
    Overflow,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "Payload buffer overflow"),
        }
    }
}

impl core::error::Error for EncodeError {}

/// Decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Version and status bytes missing
    TooShort,
    /// Payload version this decoder does not know
    UnsupportedVersion(u8),
    /// Tag not in the format
    UnknownTag(u8),
    /// Field value cut off
    Truncated(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "Payload too short"),
            Self::UnsupportedVersion(v) => write!(f, "Unsupported payload version {}", v),
            Self::UnknownTag(t) => write!(f, "Unknown tag {:#04x}", t),
            Self::Truncated(t) => write!(f, "Truncated field {:#04x}", t),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Serialize the reading record
pub fn encode(readings: &Readings) -> Result<Payload, EncodeError> {
    let mut out = Payload::new();
    let status = readings.status;
    push(&mut out, &[PAYLOAD_VERSION, status.bits()])?;

    if readings.vbat > BATTERY_MIN_VOLTS {
        let centivolts = libm::round(readings.vbat * 100.0) as i32;
        push(&mut out, &[TAG_BATTERY, (centivolts - BATTERY_OFFSET) as u8])?;
    }

    if !status.i2c_failed() {
        let temperature = libm::roundf(readings.temperature * 100.0) as i16;
        push_i16(&mut out, TAG_TEMPERATURE, temperature)?;
        push(&mut out, &[TAG_HUMIDITY, readings.humidity as u8])?;
    }

    if status.contains(StatusFlag::HasBme280) {
        push_i16(&mut out, TAG_PRESSURE, deci(readings.pressure))?;
    }

    if !status.contains(StatusFlag::ParticulateError) {
        push_i16(&mut out, TAG_PM25, deci(readings.pm25))?;
        push_i16(&mut out, TAG_PM10, deci(readings.pm10))?;
    }

    Ok(out)
}

fn deci(value: f32) -> i16 {
    libm::roundf(value * 10.0) as i32 as i16
}

fn push(out: &mut Payload, bytes: &[u8]) -> Result<(), EncodeError> {
    out.extend_from_slice(bytes)
        .map_err(|_| EncodeError::Overflow)
}

fn push_i16(out: &mut Payload, tag: u8, value: i16) -> Result<(), EncodeError> {
    let [hi, lo] = value.to_be_bytes();
    push(out, &[tag, hi, lo])
}

/// A decoded uplink, as the network server would see it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uplink {
    /// Payload format version
    pub version: u8,
    /// Status bits
    pub status: Status,
    /// Battery volts
    pub vbat: Option<f64>,
    /// °C
    pub temperature: Option<f32>,
    /// % relative humidity
    pub humidity: Option<i8>,
    /// hPa
    pub pressure: Option<f32>,
    /// PM2.5 in µg/m³
    pub pm25: Option<f32>,
    /// PM10 in µg/m³
    pub pm10: Option<f32>,
}

/// Parse an uplink payload
pub fn decode(bytes: &[u8]) -> Result<Uplink, DecodeError> {
    let [version, status, fields @ ..] = bytes else {
        return Err(DecodeError::TooShort);
    };
    if *version != PAYLOAD_VERSION {
        return Err(DecodeError::UnsupportedVersion(*version));
    }
    let mut uplink = Uplink {
        version: *version,
        status: Status::from_bits(*status),
        ..Uplink::default()
    };

    let mut rest = fields;
    while let [tag, tail @ ..] = rest {
        let len = match *tag {
            TAG_BATTERY | TAG_HUMIDITY => 1,
            TAG_TEMPERATURE | TAG_PRESSURE | TAG_PM25 | TAG_PM10 => 2,
            other => return Err(DecodeError::UnknownTag(other)),
        };
        if tail.len() < len {
            return Err(DecodeError::Truncated(*tag));
        }
        let (value, next) = tail.split_at(len);
        let wide = || f32::from(i16::from_be_bytes([value[0], value[1]]));
        match *tag {
            TAG_BATTERY => {
                uplink.vbat = Some(f64::from(i32::from(value[0]) + BATTERY_OFFSET) / 100.0)
            }
            TAG_TEMPERATURE => uplink.temperature = Some(wide() / 100.0),
            TAG_HUMIDITY => uplink.humidity = Some(value[0] as i8),
            TAG_PRESSURE => uplink.pressure = Some(wide() / 10.0),
            TAG_PM25 => uplink.pm25 = Some(wide() / 10.0),
            _ => uplink.pm10 = Some(wide() / 10.0),
        }
        rest = next;
    }

    Ok(uplink)
}
