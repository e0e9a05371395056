//! Battery voltage conversion and classification
//!
//! A Li-Ion cell is sensed through a resistor divider on an ADC pin. The
//! same pin floats high on USB power and reads near zero with no cell
//! fitted, so readings outside the plausible window are reported as
//! "unavailable" rather than as a voltage.

use crate::config::BatteryConfig;

/// Battery condition derived from the measured voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatteryState {
    /// No cell, charging, or external power
    Unavailable,
    /// Below the low-battery threshold
    Low,
    /// Normal operation
    Normal,
}

/// Classified battery voltage
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryReading {
    /// Voltage to report, 0.0 when unavailable
    pub volts: f64,
    /// Classification
    pub state: BatteryState,
}

/// Convert a raw ADC sample to volts at the battery terminal
pub fn volts_from_raw(raw: u16, config: &BatteryConfig) -> f64 {
    f64::from(raw) * config.multiplier * config.reference_volts / config.adc_full_scale
}

/// Classify a measured voltage
pub fn classify(volts: f64, config: &BatteryConfig) -> BatteryReading {
    if !(volts > config.plausible_min && volts <= config.max_level) {
        return BatteryReading {
            volts: 0.0,
            state: BatteryState::Unavailable,
        };
    }
    let state = if volts <= config.low_level {
        BatteryState::Low
    } else {
        BatteryState::Normal
    };
    BatteryReading { volts, state }
}

/// Convert and classify a raw sample in one go
pub fn measure(raw: u16, config: &BatteryConfig) -> BatteryReading {
    classify(volts_from_raw(raw, config), config)
}

/// Battery level byte for the LoRaWAN `DevStatusAns` MAC answer
///
/// 0 means external power (or no cell), 1..=254 is the charge level and
/// 255 means the level could not be measured.
pub fn mac_battery_level(volts: Option<f64>, config: &BatteryConfig) -> u8 {
    const EXTERNAL_POWER: u8 = 0;
    const UNKNOWN: u8 = 255;

    let Some(volts) = volts.filter(|v| !v.is_nan()) else {
        return UNKNOWN;
    };
    if volts > config.max_level || volts <= config.plausible_min {
        return EXTERNAL_POWER;
    }
    if volts < config.low_level {
        return 1;
    }
    let span = config.max_level - config.low_level;
    let level = 1.0 + (volts - config.low_level) / span * 253.0;
    libm::round(level).clamp(1.0, 254.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BatteryConfig {
        BatteryConfig::default()
    }

    #[test]
    fn test_raw_conversion() {
        // 620 counts behind a 1:2 divider at 3.3 V full scale
        let volts = volts_from_raw(620, &cfg());
        assert!((volts - 3.99609375).abs() < 1e-9);
    }

    #[test]
    fn test_classification_bands() {
        assert_eq!(classify(0.4, &cfg()).state, BatteryState::Unavailable);
        assert_eq!(classify(2.55, &cfg()).state, BatteryState::Unavailable);
        assert_eq!(classify(3.2, &cfg()).state, BatteryState::Low);
        assert_eq!(classify(3.5, &cfg()).state, BatteryState::Low);
        assert_eq!(classify(3.9, &cfg()).state, BatteryState::Normal);
        assert_eq!(classify(4.21, &cfg()).state, BatteryState::Normal);
        assert_eq!(classify(4.3, &cfg()).state, BatteryState::Unavailable);
    }

    #[test]
    fn test_unavailable_reads_as_zero() {
        assert_eq!(classify(4.9, &cfg()).volts, 0.0);
        assert_eq!(classify(f64::NAN, &cfg()).volts, 0.0);
        assert_eq!(classify(3.2, &cfg()).volts, 3.2);
    }

    #[test]
    fn test_mac_battery_level() {
        assert_eq!(mac_battery_level(None, &cfg()), 255);
        assert_eq!(mac_battery_level(Some(f64::NAN), &cfg()), 255);
        assert_eq!(mac_battery_level(Some(4.5), &cfg()), 0);
        assert_eq!(mac_battery_level(Some(1.0), &cfg()), 0);
        assert_eq!(mac_battery_level(Some(3.0), &cfg()), 1);
        assert_eq!(mac_battery_level(Some(3.5), &cfg()), 1);
        assert_eq!(mac_battery_level(Some(4.21), &cfg()), 254);
        let mid = mac_battery_level(Some(3.855), &cfg());
        assert!((126..=128).contains(&mid));
    }
}
