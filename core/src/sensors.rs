//! Sensor aggregator
//!
//! Owns the particulate driver, the (at most one) climate sensor and the
//! reading record that the uplink encoder serializes. Subsystem failures
//! are recorded as status bits instead of being returned, so a broken
//! sensor still produces an uplink that reports the fault.

use embedded_hal::{
    delay::DelayNs,
    i2c::{Error as _, ErrorKind, I2c},
};
use pm_sensor_hal::{
    climate::{HeatedSensor, PressureSensor},
    rtc::Timestamp,
    SerialPort,
};

use crate::{
    battery::{BatteryReading, BatteryState},
    config::SensorsConfig,
    sds011::Sds011,
};

/// Temperature when no climate sensor delivered one
pub const TEMPERATURE_UNAVAILABLE: f32 = -99.0;
/// Pressure when unsupported or failed
pub const PRESSURE_UNAVAILABLE: f32 = -1.0;
/// Humidity when no climate sensor delivered one
pub const HUMIDITY_UNAVAILABLE: i8 = -1;
/// PM value before the first successful poll
pub const PM_UNAVAILABLE: f32 = -1.0;

/// Status bits; the values are the on-air status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StatusFlag {
    /// Initialization completed
    Inited = 0x01,
    /// Particulate sensor warming up for the current cycle
    Warmup = 0x02,
    /// No climate sensor found
    I2cScanFailed = 0x04,
    /// I2C bus fault (or too many responders)
    I2cBusError = 0x08,
    /// Particulate sensor unavailable
    ParticulateError = 0x10,
    /// BME280 selected
    HasBme280 = 0x20,
    /// SHT31 selected
    HasSht31 = 0x40,
    /// SI7021 selected
    HasSi7021 = 0x80,
}

impl StatusFlag {
    /// All flags in bit order
    pub const ALL: [StatusFlag; 8] = [
        Self::Inited,
        Self::Warmup,
        Self::I2cScanFailed,
        Self::I2cBusError,
        Self::ParticulateError,
        Self::HasBme280,
        Self::HasSht31,
        Self::HasSi7021,
    ];

    /// Bit value
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// Set of [`StatusFlag`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(u8);

impl Status {
    const ERRORS: u8 = StatusFlag::I2cScanFailed.bit()
        | StatusFlag::I2cBusError.bit()
        | StatusFlag::ParticulateError.bit();

    /// Status from the on-air byte
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// On-air byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `flag` is set
    pub const fn contains(self, flag: StatusFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Copy with `flag` added
    pub const fn with(self, flag: StatusFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Whether any sticky error bit is set
    pub const fn has_error(self) -> bool {
        self.0 & Self::ERRORS != 0
    }

    /// Whether the climate sensor path failed (scan or bus)
    pub const fn i2c_failed(self) -> bool {
        self.contains(StatusFlag::I2cScanFailed) || self.contains(StatusFlag::I2cBusError)
    }

    /// Set flags in bit order
    pub fn iter(self) -> impl Iterator<Item = StatusFlag> {
        StatusFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    pub(crate) fn insert(&mut self, flag: StatusFlag) {
        self.0 |= flag.bit();
    }

    pub(crate) fn remove(&mut self, flag: StatusFlag) {
        self.0 &= !flag.bit();
    }
}

/// The reading record, overwritten each sampling cycle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    /// °C
    pub temperature: f32,
    /// hPa
    pub pressure: f32,
    /// % relative humidity
    pub humidity: i8,
    /// PM2.5 in µg/m³
    pub pm25: f32,
    /// PM10 in µg/m³
    pub pm10: f32,
    /// Battery volts, 0.0 when unavailable
    pub vbat: f64,
    /// Status bits
    pub status: Status,
}

impl Default for Readings {
    fn default() -> Self {
        Self {
            temperature: TEMPERATURE_UNAVAILABLE,
            pressure: PRESSURE_UNAVAILABLE,
            humidity: HUMIDITY_UNAVAILABLE,
            pm25: PM_UNAVAILABLE,
            pm10: PM_UNAVAILABLE,
            vbat: 0.0,
            status: Status::default(),
        }
    }
}

/// Climate sensors that may be fitted, in probe order
pub struct ClimateCandidates<P, T, U> {
    /// Temperature, humidity and pressure
    pub bme280: P,
    /// Temperature and humidity, heater
    pub sht31: T,
    /// Temperature and humidity, heater
    pub si7021: U,
}

/// The selected climate sensor
pub enum Climate<P, T, U> {
    /// BME280
    Bme280(P),
    /// SHT31
    Sht31(T),
    /// SI7021
    Si7021(U),
}

impl<P, T, U> Climate<P, T, U>
where
    P: PressureSensor,
    T: HeatedSensor,
    U: HeatedSensor,
{
    /// Probe the candidates in order and keep the first that answers
    ///
    /// Candidates after the selected one are never probed.
    pub fn select(candidates: ClimateCandidates<P, T, U>) -> Option<Self> {
        let ClimateCandidates {
            mut bme280,
            mut sht31,
            mut si7021,
        } = candidates;
        if bme280.probe() {
            return Some(Self::Bme280(bme280));
        }
        if sht31.probe() {
            return Some(Self::Sht31(sht31));
        }
        if si7021.probe() {
            return Some(Self::Si7021(si7021));
        }
        None
    }

    /// Status bit announcing this sensor
    pub fn flag(&self) -> StatusFlag {
        match self {
            Self::Bme280(_) => StatusFlag::HasBme280,
            Self::Sht31(_) => StatusFlag::HasSht31,
            Self::Si7021(_) => StatusFlag::HasSi7021,
        }
    }

    /// Sensor name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bme280(_) => "BME280",
            Self::Sht31(_) => "SHT31",
            Self::Si7021(_) => "SI7021",
        }
    }

    /// Temperature and humidity, NaN on failure
    fn read_temperature_humidity(&mut self) -> (f32, f32) {
        match self {
            Self::Bme280(s) => s.read_temperature_humidity(),
            Self::Sht31(s) => s.read_temperature_humidity(),
            Self::Si7021(s) => s.read_temperature_humidity(),
        }
    }

    /// Pressure if the sensor has a barometer
    fn read_pressure(&mut self) -> Option<f32> {
        match self {
            Self::Bme280(s) => Some(s.read_pressure()),
            _ => None,
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Bme280(_) => {}
            Self::Sht31(s) => s.reset(),
            Self::Si7021(s) => s.reset(),
        }
    }
}

/// Outcome of the I2C bus precheck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusScan {
    /// Number of responding addresses
    Devices(u8),
    /// More responders than a healthy bus can carry
    TooManyDevices,
    /// Non-NACK error at the given address
    BusError(u8),
}

/// Count responding addresses with address-only writes to 0x01..=0x7E
///
/// A NACK means nothing lives at the address. Any other error aborts the
/// scan, as does exceeding `max_devices` (a floating or shorted bus acks
/// everything).
pub fn scan_bus<I: I2c>(bus: &mut I, max_devices: u8) -> BusScan {
    let mut found = 0u8;
    for addr in 0x01..0x7F {
        match bus.write(addr, &[]) {
            Ok(()) => {
                debug!("I2C device found at {:#x}", addr);
                found += 1;
                if found > max_devices {
                    return BusScan::TooManyDevices;
                }
            }
            Err(e) => match e.kind() {
                ErrorKind::NoAcknowledge(_) => {}
                _ => return BusScan::BusError(addr),
            },
        }
    }
    BusScan::Devices(found)
}

/// What the device state machine needs from the sensors
pub trait SensorSuite {
    /// Start a measurement cycle (particulate wakeup, climate reset)
    fn warmup(&mut self, now: Timestamp);

    /// Power everything down for standby
    fn off(&mut self);

    /// Sample all sensors into the reading record
    fn read(&mut self, verbose: bool, now: Timestamp);

    /// Whether a sample can be taken now
    fn ready(&self, now: Timestamp) -> bool;

    /// Whether the particulate sensor fan is running
    fn particulate_running(&self) -> bool;

    /// Re-arm a running warmup timer after the clock jumped
    fn restart_warmup(&mut self, now: Timestamp);

    /// Store the battery measurement
    fn record_battery(&mut self, battery: BatteryReading);

    /// The reading record
    fn readings(&self) -> &Readings;

    /// Whether a sticky sensor error is set
    fn has_error(&self) -> bool {
        self.readings().status.has_error()
    }
}

/// Sensor aggregator over an SDS011 and up to one climate sensor
pub struct Sensors<S, D, P, T, U> {
    particulate: Sds011<S, D>,
    climate: Option<Climate<P, T, U>>,
    readings: Readings,
    config: SensorsConfig,
}

impl<S, D, P, T, U> Sensors<S, D, P, T, U>
where
    S: SerialPort,
    D: DelayNs,
    P: PressureSensor,
    T: HeatedSensor,
    U: HeatedSensor,
{
    /// Create the aggregator; nothing is touched before [`Sensors::init`]
    pub fn new(particulate: Sds011<S, D>, config: SensorsConfig) -> Self {
        Self {
            particulate,
            climate: None,
            readings: Readings::default(),
            config,
        }
    }

    /// Detect the fitted sensors and bring up the particulate sensor
    pub fn init<I: I2c>(
        &mut self,
        bus: &mut I,
        candidates: ClimateCandidates<P, T, U>,
        now: Timestamp,
    ) -> Status {
        let status = &mut self.readings.status;

        match scan_bus(bus, self.config.max_bus_devices) {
            BusScan::Devices(0) => {
                warn!("No I2C devices found");
                status.insert(StatusFlag::I2cScanFailed);
            }
            BusScan::Devices(n) => {
                if n > 1 {
                    warn!("{} I2C devices found, expected one", n);
                }
                match Climate::select(candidates) {
                    Some(climate) => {
                        info!("Found {}", climate.name());
                        status.insert(climate.flag());
                        self.climate = Some(climate);
                    }
                    None => {
                        warn!("No climate sensor answered");
                        status.insert(StatusFlag::I2cScanFailed);
                    }
                }
            }
            BusScan::TooManyDevices => {
                error!("Too many I2C devices, bus fault?");
                status.insert(StatusFlag::I2cBusError);
            }
            BusScan::BusError(addr) => {
                error!("I2C bus error at {:#x}", addr);
                status.insert(StatusFlag::I2cBusError);
            }
        }

        match self
            .particulate
            .begin(now)
            .and_then(|()| self.particulate.query_info())
        {
            Ok(info) => {
                info!("SDS011 firmware {:?}, id {:#x}", info.firmware, info.device_id);
            }
            Err(e) => {
                error!("SDS011 init failed: {:?}", e);
                self.readings.status.insert(StatusFlag::ParticulateError);
            }
        }

        self.readings.status.insert(StatusFlag::Inited);
        self.readings.status
    }

    /// The selected climate sensor
    pub fn climate(&self) -> Option<&Climate<P, T, U>> {
        self.climate.as_ref()
    }

    /// The particulate driver
    pub fn particulate(&self) -> &Sds011<S, D> {
        &self.particulate
    }

    /// Take the drivers back
    pub fn release(self) -> (Sds011<S, D>, Option<Climate<P, T, U>>) {
        (self.particulate, self.climate)
    }

    fn read_climate(&mut self) {
        let Some(climate) = self.climate.as_mut() else {
            return;
        };
        let (temperature, humidity) = climate.read_temperature_humidity();
        self.readings.temperature = if temperature.is_nan() {
            TEMPERATURE_UNAVAILABLE
        } else {
            temperature
        };
        self.readings.humidity = if humidity.is_nan() {
            HUMIDITY_UNAVAILABLE
        } else {
            humidity.clamp(0.0, 100.0) as i8
        };
        if let Some(pressure) = climate.read_pressure() {
            self.readings.pressure = if pressure.is_nan() {
                PRESSURE_UNAVAILABLE
            } else {
                pressure
            };
        }
    }
}

impl<S, D, P, T, U> SensorSuite for Sensors<S, D, P, T, U>
where
    S: SerialPort,
    D: DelayNs,
    P: PressureSensor,
    T: HeatedSensor,
    U: HeatedSensor,
{
    fn warmup(&mut self, now: Timestamp) {
        if !self.readings.status.contains(StatusFlag::ParticulateError) {
            match self.particulate.wakeup(now) {
                Ok(()) => {
                    if let Err(e) = self.particulate.set_passive_mode() {
                        warn!("SDS011 passive mode failed: {:?}", e);
                    }
                }
                Err(e) => {
                    error!("SDS011 wakeup failed: {:?}", e);
                    self.readings.status.insert(StatusFlag::ParticulateError);
                }
            }
        }
        if let Some(climate) = self.climate.as_mut() {
            climate.reset();
        }
        self.readings.status.insert(StatusFlag::Warmup);
    }

    fn off(&mut self) {
        if !self.readings.status.contains(StatusFlag::ParticulateError) {
            if let Err(e) = self.particulate.sleep() {
                warn!("SDS011 sleep failed: {:?}", e);
            }
        }

        let pulse = self.readings.humidity > self.config.heater_humidity_threshold;
        let pulse_ms = self.config.heater_pulse_ms;
        match self.climate.as_mut() {
            Some(Climate::Bme280(s)) => s.sleep(),
            Some(Climate::Sht31(s)) if pulse => {
                pulse_heater(s, &mut self.particulate, pulse_ms);
            }
            Some(Climate::Si7021(s)) if pulse => {
                pulse_heater(s, &mut self.particulate, pulse_ms);
            }
            _ => {}
        }

        self.readings.status.remove(StatusFlag::Warmup);
    }

    fn read(&mut self, verbose: bool, now: Timestamp) {
        if !self.readings.status.contains(StatusFlag::ParticulateError) {
            match self.particulate.poll(self.config.poll_repeat, now) {
                Ok(pm) => {
                    self.readings.pm25 = pm.pm25;
                    self.readings.pm10 = pm.pm10;
                }
                Err(e) => warn!("SDS011 poll failed: {:?}", e),
            }
        }
        self.read_climate();

        if verbose {
            let r = &self.readings;
            info!("PM2.5: {} ug/m3, PM10: {} ug/m3", r.pm25, r.pm10);
            info!(
                "Temperature: {} C, humidity: {} %, pressure: {} hPa",
                r.temperature,
                r.humidity,
                r.pressure
            );
        }
    }

    fn ready(&self, now: Timestamp) -> bool {
        !self.readings.status.contains(StatusFlag::ParticulateError)
            && self.particulate.is_ready(now)
    }

    fn particulate_running(&self) -> bool {
        self.particulate.is_running()
    }

    fn restart_warmup(&mut self, now: Timestamp) {
        self.particulate.restart_warmup(now);
    }

    fn record_battery(&mut self, battery: BatteryReading) {
        match battery.state {
            BatteryState::Low => warn!("Battery low: {} V", battery.volts),
            BatteryState::Unavailable => debug!("No battery reading"),
            BatteryState::Normal => debug!("Battery: {} V", battery.volts),
        }
        self.readings.vbat = battery.volts;
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }
}

/// Heater on for `ms`, then off; evaporates condensation after humid cycles
fn pulse_heater<H, S, D>(sensor: &mut H, timer: &mut Sds011<S, D>, ms: u32)
where
    H: HeatedSensor,
    S: SerialPort,
    D: DelayNs,
{
    debug!("Heater pulse {} ms", ms);
    sensor.set_heater(true);
    timer.pause_ms(ms);
    sensor.set_heater(false);
}
