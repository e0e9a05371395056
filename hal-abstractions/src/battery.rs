//! Battery voltage measurement

/// ADC channel wired to the battery voltage divider
pub trait BatteryMonitor {
    /// Raw ADC sample, `None` if the conversion failed
    fn read_raw(&mut self) -> Option<u16>;
}
