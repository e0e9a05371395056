//! Auxiliary climate sensors on the I2C bus
//!
//! The node carries at most one of BME280, SHT31 or SI7021. Their register
//! maps live in the board's drivers; the core only needs the capabilities
//! below.

/// Temperature and humidity sensor
pub trait ClimateSensor {
    /// Initialize the sensor, `false` if it does not answer
    fn probe(&mut self) -> bool;

    /// Temperature in °C and relative humidity in %
    ///
    /// Either value is NaN when the measurement failed.
    fn read_temperature_humidity(&mut self) -> (f32, f32);
}

/// Climate sensor with a barometer (BME280)
pub trait PressureSensor: ClimateSensor {
    /// Pressure in hPa, NaN when the measurement failed
    fn read_pressure(&mut self) -> f32;

    /// Put the sensor into its sleep mode
    fn sleep(&mut self);
}

/// Climate sensor with an on-chip heater (SHT31, SI7021)
pub trait HeatedSensor: ClimateSensor {
    /// Switch the heater on or off
    fn set_heater(&mut self, on: bool);

    /// Soft reset
    fn reset(&mut self);
}

/// Placeholder for a sensor not fitted on the board; never probes
#[derive(Debug, Clone, Copy, Default)]
pub struct Absent;

impl ClimateSensor for Absent {
    fn probe(&mut self) -> bool {
        false
    }

    fn read_temperature_humidity(&mut self) -> (f32, f32) {
        (f32::NAN, f32::NAN)
    }
}

impl PressureSensor for Absent {
    fn read_pressure(&mut self) -> f32 {
        f32::NAN
    }

    fn sleep(&mut self) {}
}

impl HeatedSensor for Absent {
    fn set_heater(&mut self, _on: bool) {}

    fn reset(&mut self) {}
}
