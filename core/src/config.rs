//! Configuration structures
//!
//! Defaults are the tuning of the reference node (Feather M0 + SDS011,
//! 10 minute observation interval). There is no runtime configuration
//! surface; boards override fields in code if they need to.

use embedded_hal::delay::DelayNs;

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Total number of attempts (at least one is always made)
    pub attempts: u8,
    /// Pause after a failed attempt in milliseconds
    pub delay_ms: u32,
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// The delay is lent to `op` between pauses so the operation can do its
    /// own timed polling. Returns the last error on exhaustion.
    pub fn run<D, T, E>(&self, delay: &mut D, mut op: impl FnMut(&mut D) -> Result<T, E>) -> Result<T, E>
    where
        D: DelayNs,
    {
        let mut attempt = 1;
        loop {
            match op(delay) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(_) => {
                    delay.delay_ms(self.delay_ms);
                    attempt += 1;
                }
            }
        }
    }
}

/// SDS011 driver configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sds011Config {
    /// Fan/laser warmup before readings are trusted, in seconds
    pub warmup_secs: u16,
    /// Budget for assembling one response frame, in milliseconds
    pub read_timeout_ms: u32,
    /// Retry policy for wake/sleep/mode/info commands
    pub command_retry: RetryPolicy,
    /// Pause between consecutive queries of an averaged poll, in milliseconds
    pub settle_ms: u32,
}

impl Default for Sds011Config {
    fn default() -> Self {
        Self {
            warmup_secs: 20,
            read_timeout_ms: 1000,
            command_retry: RetryPolicy {
                attempts: 3,
                delay_ms: 500,
            },
            settle_ms: 1500,
        }
    }
}

/// Sensor aggregator configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorsConfig {
    /// More responders than this on the I2C bus is treated as a bus fault
    pub max_bus_devices: u8,
    /// Extra queries per poll; the PM values are the mean of `poll_repeat + 1` reads
    pub poll_repeat: u8,
    /// Humidity (%) above which the heater is pulsed on power down
    pub heater_humidity_threshold: i8,
    /// Heater on-time in milliseconds
    pub heater_pulse_ms: u32,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            max_bus_devices: 5,
            poll_repeat: 2,
            heater_humidity_threshold: 90,
            heater_pulse_ms: 1500,
        }
    }
}

/// Battery voltage divider and Li-Ion thresholds
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryConfig {
    /// Voltage divider ratio on the VBAT pin
    pub multiplier: f64,
    /// ADC reference voltage
    pub reference_volts: f64,
    /// ADC full scale (counts)
    pub adc_full_scale: f64,
    /// At or below this no battery is connected (or it is charging)
    pub plausible_min: f64,
    /// At or below this the battery is reported low
    pub low_level: f64,
    /// Above this the node runs on external power
    pub max_level: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            reference_volts: 3.3,
            adc_full_scale: 1024.0,
            plausible_min: 2.55,
            low_level: 3.5,
            max_level: 4.21,
        }
    }
}

/// Device state machine configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Sleep between observation cycles, in seconds
    pub observation_interval_secs: u32,
    /// Join attempts per session before backing off
    pub join_attempts: u8,
    /// Upper bound for a single join attempt, in seconds
    pub join_timeout_secs: u32,
    /// Give up on a queued uplink that has not completed after this many seconds
    pub tx_timeout_secs: u32,
    /// LoRaWAN application port for observation uplinks
    pub uplink_port: u8,
    /// Request network time every this many uplinks (0 disables)
    pub network_time_interval: u32,
    /// Log every reading
    pub verbose: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            observation_interval_secs: 600,
            join_attempts: 3,
            join_timeout_secs: 20,
            tx_timeout_secs: 120,
            uplink_port: 1,
            network_time_interval: 30,
            verbose: true,
        }
    }
}
