//! Real-time clock and low-power sleep
//!
//! The RTC is the node's wall clock and the alarm source that wakes the MCU
//! from standby at the end of an observation interval.

/// Timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    /// Unix timestamp in seconds since epoch (1970-01-01 00:00:00 UTC)
    pub unix_secs: u64,
    /// Microseconds component (0-999,999)
    pub micros: u32,
}

impl Timestamp {
    /// Create a new timestamp
    pub const fn new(unix_secs: u64, micros: u32) -> Self {
        Self { unix_secs, micros }
    }

    /// Create a timestamp on a whole second
    pub const fn from_secs(unix_secs: u64) -> Self {
        Self::new(unix_secs, 0)
    }

    /// Convert a LoRaWAN network time reference (seconds since the GPS epoch)
    ///
    /// `elapsed_ms` is the local time that passed between the reference and
    /// now; it is added so the result is the current time.
    pub fn from_gps(gps_secs: u64, elapsed_ms: u64) -> Self {
        /// GPS epoch offset (1970-01-01 to 1980-01-06 in seconds)
        const GPS_UNIX_OFFSET: u64 = 315_964_800;
        /// Leap seconds GPS time is ahead of UTC
        const GPS_LEAP_SECONDS: u64 = 18;

        let unix_secs = gps_secs
            .saturating_add(GPS_UNIX_OFFSET)
            .saturating_sub(GPS_LEAP_SECONDS);
        Self::from_secs(unix_secs).add_millis(elapsed_ms)
    }

    /// Milliseconds since the Unix epoch
    pub const fn as_millis(&self) -> u64 {
        self.unix_secs
            .saturating_mul(1000)
            .saturating_add((self.micros / 1000) as u64)
    }

    /// Timestamp `secs` seconds later
    pub const fn add_secs(self, secs: u64) -> Self {
        Self::new(self.unix_secs.saturating_add(secs), self.micros)
    }

    /// Timestamp `millis` milliseconds later
    pub const fn add_millis(self, millis: u64) -> Self {
        let micros = self.micros as u64 + (millis % 1000) * 1000;
        Self::new(
            self.unix_secs
                .saturating_add(millis / 1000)
                .saturating_add(micros / 1_000_000),
            (micros % 1_000_000) as u32,
        )
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is in the future
    pub const fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.as_millis().saturating_sub(earlier.as_millis())
    }

    /// Hour, minute and second of the UTC day
    pub const fn time_of_day(&self) -> (u8, u8, u8) {
        const SECONDS_PER_DAY: u64 = 86400;
        let secs_today = self.unix_secs % SECONDS_PER_DAY;
        (
            (secs_today / 3600) as u8,
            ((secs_today % 3600) / 60) as u8,
            (secs_today % 60) as u8,
        )
    }
}

/// Hardware real-time clock with an alarm-driven standby mode
pub trait Rtc {
    /// Current wall-clock time
    fn now(&mut self) -> Timestamp;

    /// Enter low-power standby until the alarm at `wake_at` fires
    ///
    /// Blocks for the whole interval; no other processing happens meanwhile.
    fn sleep_until(&mut self, wake_at: Timestamp);

    /// Set the wall clock (e.g. from LoRaWAN network time)
    fn set_clock(&mut self, unix_secs: u64);
}
