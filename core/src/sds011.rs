//! SDS011 particulate matter sensor driver
//!
//! The sensor speaks a fixed binary protocol over its UART (9600 8N1):
//!
//! ```text
//! command  (19 bytes): AA B4 CMD D1 D2 00*10 FF FF CRC AB
//! response (10 bytes): AA RC  P0 P1 P2 P3 P4 P5 CRC AB
//! ```
//!
//! The command checksum is the 8-bit sum of bytes 2..=16, the response
//! checksum the 8-bit sum of bytes 2..=7. Responses are captured byte by
//! byte with [`FrameScanner`], which starts over whenever a positional check
//! fails, so stray bytes from a free-running sensor are skipped.
//!
//! After wakeup the fan and laser need [`Sds011Config::warmup_secs`] before
//! readings are trusted; [`Sds011::poll`] refuses to measure earlier.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use pm_sensor_hal::{rtc::Timestamp, SerialPort};

use crate::config::Sds011Config;

/// Length of a command frame
pub const COMMAND_LEN: usize = 19;
/// Length of a response frame
pub const RESPONSE_LEN: usize = 10;

const HEAD: u8 = 0xAA;
const TAIL: u8 = 0xAB;
const COMMAND_ID: u8 = 0xB4;
const ANY_DEVICE: [u8; 2] = [0xFF, 0xFF];

/// Reply code for data reports
const REPLY_DATA: u8 = 0xC0;
/// Reply code for command acknowledgements
const REPLY_ACK: u8 = 0xC5;

/// Command codes (byte 2 of a command, byte 2 of its acknowledgement)
mod code {
    pub const REPORTING_MODE: u8 = 0x02;
    pub const QUERY: u8 = 0x04;
    pub const WORK_MODE: u8 = 0x06;
    pub const FIRMWARE: u8 = 0x07;
}

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sds011Error {
    /// UART read or write failed
    Serial,
    /// No valid response frame within the read timeout
    Timeout,
    /// Warmup has not completed (or the sensor is asleep)
    NotReady,
}

impl fmt::Display for Sds011Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial port error"),
            Self::Timeout => write!(f, "Response timeout"),
            Self::NotReady => write!(f, "Sensor not ready"),
        }
    }
}

impl core::error::Error for Sds011Error {}

/// Reasons a command frame is rejected by [`Command::decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Byte 0 is not `0xAA`
    Head,
    /// Byte 1 is not the command marker `0xB4`
    CommandId,
    /// Checksum mismatch
    Checksum,
    /// Last byte is not `0xAB`
    Tail,
    /// Command code/data combination this driver does not use
    Unknown,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => write!(f, "Invalid frame head"),
            Self::CommandId => write!(f, "Invalid command marker"),
            Self::Checksum => write!(f, "Checksum mismatch"),
            Self::Tail => write!(f, "Invalid frame tail"),
            Self::Unknown => write!(f, "Unknown command"),
        }
    }
}

impl core::error::Error for FrameError {}

/// Reply the sensor sends for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reply {
    /// Byte 1 of the response
    pub code: u8,
    /// Byte 2 of the response; data reports carry measurements there
    pub sub: Option<u8>,
}

/// Commands used by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Report only on explicit query
    PassiveMode,
    /// Request one PM reading
    Query,
    /// Stop fan and laser
    Sleep,
    /// Start fan and laser
    Wakeup,
    /// Request firmware version and device id
    FirmwareInfo,
}

impl Command {
    /// Command code (byte 2)
    pub const fn code(self) -> u8 {
        match self {
            Self::PassiveMode => code::REPORTING_MODE,
            Self::Query => code::QUERY,
            Self::Sleep | Self::Wakeup => code::WORK_MODE,
            Self::FirmwareInfo => code::FIRMWARE,
        }
    }

    /// Command data (bytes 3 and 4)
    pub const fn data(self) -> [u8; 2] {
        match self {
            // set, query mode
            Self::PassiveMode => [0x01, 0x01],
            // set, sleep
            Self::Sleep => [0x01, 0x00],
            // set, work
            Self::Wakeup => [0x01, 0x01],
            Self::Query | Self::FirmwareInfo => [0x00, 0x00],
        }
    }

    /// Expected response
    pub const fn reply(self) -> Reply {
        match self {
            Self::Query => Reply {
                code: REPLY_DATA,
                sub: None,
            },
            _ => Reply {
                code: REPLY_ACK,
                sub: Some(self.code()),
            },
        }
    }

    /// Short name for log lines
    pub const fn name(self) -> &'static str {
        match self {
            Self::PassiveMode => "passiveMode",
            Self::Query => "query",
            Self::Sleep => "sleep",
            Self::Wakeup => "wakeup",
            Self::FirmwareInfo => "info",
        }
    }

    /// Build the 19-byte command frame addressed to any device
    pub fn encode(self) -> [u8; COMMAND_LEN] {
        let mut frame = [0u8; COMMAND_LEN];
        let [d1, d2] = self.data();
        frame[0] = HEAD;
        frame[1] = COMMAND_ID;
        frame[2] = self.code();
        frame[3] = d1;
        frame[4] = d2;
        frame[15..17].copy_from_slice(&ANY_DEVICE);
        frame[17] = command_checksum(&frame);
        frame[18] = TAIL;
        frame
    }

    /// Parse a command frame
    pub fn decode(frame: &[u8; COMMAND_LEN]) -> Result<Self, FrameError> {
        if frame[0] != HEAD {
            return Err(FrameError::Head);
        }
        if frame[1] != COMMAND_ID {
            return Err(FrameError::CommandId);
        }
        if frame[18] != TAIL {
            return Err(FrameError::Tail);
        }
        if frame[17] != command_checksum(frame) {
            return Err(FrameError::Checksum);
        }
        match (frame[2], [frame[3], frame[4]]) {
            (code::REPORTING_MODE, [0x01, 0x01]) => Ok(Self::PassiveMode),
            (code::QUERY, _) => Ok(Self::Query),
            (code::WORK_MODE, [0x01, 0x00]) => Ok(Self::Sleep),
            (code::WORK_MODE, [0x01, 0x01]) => Ok(Self::Wakeup),
            (code::FIRMWARE, _) => Ok(Self::FirmwareInfo),
            _ => Err(FrameError::Unknown),
        }
    }
}

/// 8-bit sum over bytes 2..=16 of a command frame
pub fn command_checksum(frame: &[u8; COMMAND_LEN]) -> u8 {
    frame[2..17].iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// 8-bit sum over bytes 2..=7 of a response frame
pub fn response_checksum(frame: &[u8; RESPONSE_LEN]) -> u8 {
    frame[2..8].iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// A validated 10-byte response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Response([u8; RESPONSE_LEN]);

impl Response {
    /// Raw frame bytes
    pub const fn bytes(&self) -> &[u8; RESPONSE_LEN] {
        &self.0
    }

    /// Reply code (byte 1)
    pub const fn code(&self) -> u8 {
        self.0[1]
    }

    /// PM values of a data report
    pub fn pm(&self) -> PmReading {
        let b = &self.0;
        PmReading {
            pm25: f32::from(u16::from_le_bytes([b[2], b[3]])) / 10.0,
            pm10: f32::from(u16::from_le_bytes([b[4], b[5]])) / 10.0,
        }
    }

    /// Firmware version and device id of an info reply
    pub fn info(&self) -> SensorInfo {
        let b = &self.0;
        SensorInfo {
            firmware: FirmwareVersion {
                year: b[3] % 100,
                month: b[4] % 100,
                day: b[5] % 100,
            },
            device_id: u16::from_be_bytes([b[6], b[7]]),
        }
    }
}

/// Byte-synchronous response capture
///
/// Feed received bytes one at a time; a complete frame is returned once all
/// ten bytes passed their positional checks. Any failed check drops the
/// partial frame and capture restarts at byte 0.
#[derive(Debug, Clone)]
pub struct FrameScanner {
    expected: Reply,
    buf: [u8; RESPONSE_LEN],
    len: usize,
}

impl FrameScanner {
    /// Scanner accepting only frames matching `expected`
    pub const fn new(expected: Reply) -> Self {
        Self {
            expected,
            buf: [0; RESPONSE_LEN],
            len: 0,
        }
    }

    /// Number of bytes of the frame captured so far
    pub const fn captured(&self) -> usize {
        self.len
    }

    /// Push one byte, returning the frame it completed
    pub fn push(&mut self, byte: u8) -> Option<Response> {
        let pos = self.len;
        self.buf[pos] = byte;
        let valid = match pos {
            0 => byte == HEAD,
            1 => byte == self.expected.code,
            2 => self.expected.sub.map_or(true, |sub| byte == sub),
            8 => byte == response_checksum(&self.buf),
            9 => byte == TAIL,
            _ => true,
        };

        if !valid {
            trace!("SDS011 resync at byte {}", pos);
            // a rejected byte may still open the next frame
            if pos > 0 && byte == HEAD {
                self.buf[0] = HEAD;
                self.len = 1;
            } else {
                self.len = 0;
            }
            return None;
        }

        self.len += 1;
        if self.len == RESPONSE_LEN {
            self.len = 0;
            return Some(Response(self.buf));
        }
        None
    }
}

/// One PM2.5/PM10 measurement in µg/m³
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PmReading {
    /// PM2.5 mass concentration
    pub pm25: f32,
    /// PM10 mass concentration
    pub pm10: f32,
}

/// Firmware build date as reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    /// Two-digit year
    pub year: u8,
    /// Month
    pub month: u8,
    /// Day
    pub day: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}{:02}", self.year, self.month, self.day)
    }
}

/// Result of the firmware info command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorInfo {
    /// Firmware version
    pub firmware: FirmwareVersion,
    /// Device id
    pub device_id: u16,
}

/// SDS011 driver
///
/// Owns the serial port and a delay provider. The warmup timer is the only
/// session state: it starts when a wakeup command is sent and is cleared by
/// [`Sds011::sleep`].
pub struct Sds011<S, D> {
    serial: S,
    delay: D,
    config: Sds011Config,
    warmup_started: Option<Timestamp>,
}

impl<S, D> Sds011<S, D>
where
    S: SerialPort,
    D: DelayNs,
{
    /// Create a driver with the default configuration
    pub fn new(serial: S, delay: D) -> Self {
        Self::with_config(serial, delay, Sds011Config::default())
    }

    /// Create a driver with a custom configuration
    pub fn with_config(serial: S, delay: D, config: Sds011Config) -> Self {
        Self {
            serial,
            delay,
            config,
            warmup_started: None,
        }
    }

    /// Give back the serial port and delay
    pub fn release(self) -> (S, D) {
        (self.serial, self.delay)
    }

    /// The serial port
    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Driver configuration
    pub fn config(&self) -> &Sds011Config {
        &self.config
    }

    /// Wake the sensor and switch it to query reporting
    pub fn begin(&mut self, now: Timestamp) -> Result<(), Sds011Error> {
        self.wakeup(now)?;
        self.set_passive_mode()
    }

    /// Start fan and laser
    ///
    /// The warmup timer starts with the first command sent, even if no
    /// acknowledgement arrives.
    pub fn wakeup(&mut self, now: Timestamp) -> Result<(), Sds011Error> {
        self.warmup_started = Some(now);
        self.command(Command::Wakeup).map(|_| ())
    }

    /// Stop fan and laser (< 4 mA)
    pub fn sleep(&mut self) -> Result<(), Sds011Error> {
        self.warmup_started = None;
        self.command(Command::Sleep).map(|_| ())
    }

    /// Report only on explicit query; needed after every wakeup
    pub fn set_passive_mode(&mut self) -> Result<(), Sds011Error> {
        self.command(Command::PassiveMode).map(|_| ())
    }

    /// Firmware version and device id
    pub fn query_info(&mut self) -> Result<SensorInfo, Sds011Error> {
        self.command(Command::FirmwareInfo).map(|r| r.info())
    }

    /// Whether fan and laser were started and not stopped since
    pub fn is_running(&self) -> bool {
        self.warmup_started.is_some()
    }

    /// Restart a running warmup timer at `now` (after the clock was set)
    pub fn restart_warmup(&mut self, now: Timestamp) {
        if self.warmup_started.is_some() {
            self.warmup_started = Some(now);
        }
    }

    /// Seconds of warmup left, `None` if the sensor is not running
    pub fn warmup_remaining_secs(&self, now: Timestamp) -> Option<u64> {
        self.warmup_started.map(|started| {
            u64::from(self.config.warmup_secs).saturating_sub(now.millis_since(started) / 1000)
        })
    }

    /// Whether warmup has completed
    pub fn is_ready(&self, now: Timestamp) -> bool {
        self.warmup_remaining_secs(now) == Some(0)
    }

    /// Measure PM2.5/PM10, averaged over `repeat + 1` queries
    ///
    /// Fails without querying if warmup is not done. Any failed query aborts
    /// the whole poll; there is no partial result.
    pub fn poll(&mut self, repeat: u8, now: Timestamp) -> Result<PmReading, Sds011Error> {
        if !self.is_ready(now) {
            if let Some(secs) = self.warmup_remaining_secs(now) {
                debug!("SDS011 warming up ({} secs)...", secs);
            }
            return Err(Sds011Error::NotReady);
        }

        let samples = u32::from(repeat) + 1;
        let mut mean = PmReading { pm25: 0.0, pm10: 0.0 };
        for n in 1..=samples {
            let reading = exchange(
                &mut self.serial,
                &mut self.delay,
                self.config.read_timeout_ms,
                Command::Query,
            )?
            .pm();
            mean.pm25 += (reading.pm25 - mean.pm25) / n as f32;
            mean.pm10 += (reading.pm10 - mean.pm10) / n as f32;
            if n < samples {
                self.delay.delay_ms(self.config.settle_ms);
            }
        }
        Ok(mean)
    }

    /// Pause using the driver's delay provider
    pub(crate) fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Send `command` and wait for its reply, retrying per configuration
    fn command(&mut self, command: Command) -> Result<Response, Sds011Error> {
        let Self {
            serial,
            delay,
            config,
            ..
        } = self;
        let timeout_ms = config.read_timeout_ms;
        config.command_retry.run(delay, |delay| {
            exchange(serial, delay, timeout_ms, command).inspect_err(|e| {
                warn!("SDS011 {} failed: {:?}", command.name(), e);
            })
        })
    }
}

/// One command/response round trip without retry
fn exchange<S, D>(
    serial: &mut S,
    delay: &mut D,
    timeout_ms: u32,
    command: Command,
) -> Result<Response, Sds011Error>
where
    S: SerialPort,
    D: DelayNs,
{
    let frame = command.encode();
    trace!("SDS011 cmd({}) {:?}", command.name(), frame);
    serial.write_all(&frame).map_err(|_| Sds011Error::Serial)?;
    serial.flush().map_err(|_| Sds011Error::Serial)?;
    receive(serial, delay, timeout_ms, command.reply())
}

/// Capture one response frame matching `expected`
///
/// The budget is spent one unit per received byte or per idle millisecond,
/// so a sensor streaming garbage times out as well as a silent one.
fn receive<S, D>(
    serial: &mut S,
    delay: &mut D,
    timeout_ms: u32,
    expected: Reply,
) -> Result<Response, Sds011Error>
where
    S: Read + ReadReady,
    D: DelayNs,
{
    let mut scanner = FrameScanner::new(expected);
    let mut byte = [0u8; 1];
    for _ in 0..timeout_ms {
        if serial.read_ready().map_err(|_| Sds011Error::Serial)? {
            let n = serial.read(&mut byte).map_err(|_| Sds011Error::Serial)?;
            if n == 1 {
                if let Some(response) = scanner.push(byte[0]) {
                    trace!("SDS011 read({:#x}) {:?}", expected.code, response.bytes());
                    return Ok(response);
                }
                continue;
            }
        }
        delay.delay_ms(1);
    }
    warn!("SDS011 read timeout!");
    Err(Sds011Error::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response_frame, SimulatedSds011};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    fn approx(a: f32, b: f32) -> bool {
        let d = a - b;
        d < 1e-4 && d > -1e-4
    }

    fn driver(sim: SimulatedSds011) -> Sds011<SimulatedSds011, NoopDelay> {
        Sds011::new(sim, NoopDelay::new())
    }

    const ALL_COMMANDS: [Command; 5] = [
        Command::PassiveMode,
        Command::Query,
        Command::Sleep,
        Command::Wakeup,
        Command::FirmwareInfo,
    ];

    #[test]
    fn test_wakeup_frame_matches_datasheet() {
        assert_eq!(
            Command::Wakeup.encode(),
            [
                0xAA, 0xB4, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0xFF, 0xFF, 0x06, 0xAB
            ]
        );
    }

    #[test]
    fn test_command_checksum_in_place() {
        for command in ALL_COMMANDS {
            let frame = command.encode();
            let sum = frame[2..17].iter().fold(0u8, |s, b| s.wrapping_add(*b));
            assert_eq!(frame[17], sum, "{:?}", command);
            assert_eq!(frame[0], 0xAA);
            assert_eq!(frame[18], 0xAB);
        }
    }

    #[test]
    fn test_command_encode_decode_is_stable() {
        for command in ALL_COMMANDS {
            let frame = command.encode();
            let decoded = Command::decode(&frame).unwrap();
            assert_eq!(decoded, command);
            assert_eq!(decoded.encode(), frame);
        }
    }

    #[test]
    fn test_command_decode_rejects_bad_checksum() {
        let mut frame = Command::Sleep.encode();
        frame[17] ^= 0x01;
        assert_eq!(Command::decode(&frame), Err(FrameError::Checksum));
    }

    #[test]
    fn test_scanner_accepts_valid_ack() {
        let frame = response_frame(0xC5, [0x06, 0x01, 0x01, 0x00, 0xA1, 0x60]);
        let mut scanner = FrameScanner::new(Command::Wakeup.reply());
        for b in &frame[..4] {
            assert_eq!(scanner.push(*b), None);
        }
        assert_eq!(scanner.captured(), 4);
        let mut result = None;
        for b in &frame[4..] {
            result = scanner.push(*b);
        }
        assert_eq!(result.map(|r| *r.bytes()), Some(frame));
        assert_eq!(scanner.captured(), 0);
    }

    #[test]
    fn test_scanner_rejects_any_corrupted_position_then_resyncs() {
        let good = response_frame(0xC5, [0x07, 0x12, 0x05, 0x17, 0x12, 0x34]);
        // head, reply code, sub-code, checksum, tail
        for pos in [0usize, 1, 2, 8, 9] {
            let mut bad = good;
            bad[pos] ^= 0x10;
            let mut scanner = FrameScanner::new(Command::FirmwareInfo.reply());
            for b in bad {
                assert!(scanner.push(b).is_none(), "corruption at {} accepted", pos);
            }
            let mut result = None;
            for b in good {
                result = scanner.push(b);
            }
            assert!(result.is_some(), "no resync after corruption at {}", pos);
        }
    }

    #[test]
    fn test_scanner_rejects_corrupted_payload_by_checksum() {
        let good = response_frame(0xC0, [0x64, 0x00, 0xC8, 0x00, 0x12, 0x34]);
        for pos in 2..8 {
            let mut bad = good;
            bad[pos] = bad[pos].wrapping_add(1);
            let mut scanner = FrameScanner::new(Command::Query.reply());
            assert!(bad.iter().all(|b| scanner.push(*b).is_none()));
        }
    }

    #[test]
    fn test_scanner_skips_leading_garbage() {
        let good = response_frame(0xC0, [0x64, 0x00, 0xC8, 0x00, 0x12, 0x34]);
        let mut scanner = FrameScanner::new(Command::Query.reply());
        for b in [0x00, 0xAB, 0xAA, 0x13, 0xFF] {
            assert!(scanner.push(b).is_none());
        }
        let mut result = None;
        for b in good {
            result = scanner.push(b);
        }
        assert!(result.is_some());
    }

    #[test]
    fn test_query_reply_ignores_sub_code() {
        let frame = response_frame(0xC0, [0x64, 0x00, 0xC8, 0x00, 0x12, 0x34]);
        let mut scanner = FrameScanner::new(Command::Query.reply());
        let response = frame.iter().find_map(|b| scanner.push(*b)).unwrap();
        assert_eq!(response.code(), 0xC0);
        let pm = response.pm();
        assert!(approx(pm.pm25, 10.0));
        assert!(approx(pm.pm10, 20.0));
    }

    #[test]
    fn test_info_decoding() {
        let frame = response_frame(0xC5, [0x07, 18, 11, 16, 0xA1, 0x60]);
        let mut scanner = FrameScanner::new(Command::FirmwareInfo.reply());
        let info = frame.iter().find_map(|b| scanner.push(*b)).unwrap().info();
        assert_eq!(
            info.firmware,
            FirmwareVersion {
                year: 18,
                month: 11,
                day: 16
            }
        );
        assert_eq!(info.device_id, 0xA160);
    }

    #[test]
    fn test_wakeup_starts_warmup_even_without_ack() {
        let mut sim = SimulatedSds011::new();
        sim.silent = true;
        let mut sds = driver(sim);
        let t0 = Timestamp::from_secs(1000);
        assert_eq!(sds.wakeup(t0), Err(Sds011Error::Timeout));
        assert!(sds.is_running());
        assert!(!sds.is_ready(t0.add_secs(19)));
        assert!(sds.is_ready(t0.add_secs(20)));
        // three attempts with the default policy
        let (sim, _) = sds.release();
        assert_eq!(sim.commands.len(), 3);
    }

    #[test]
    fn test_sleep_clears_warmup() {
        let mut sds = driver(SimulatedSds011::new());
        let t0 = Timestamp::from_secs(1000);
        sds.wakeup(t0).unwrap();
        sds.sleep().unwrap();
        assert!(!sds.is_running());
        assert!(!sds.is_ready(t0.add_secs(60)));
    }

    #[test]
    fn test_never_started_is_not_ready() {
        let sds = driver(SimulatedSds011::new());
        assert!(!sds.is_ready(Timestamp::from_secs(1_000_000)));
    }

    #[test]
    fn test_begin_sets_passive_mode() {
        let mut sds = driver(SimulatedSds011::new());
        sds.begin(Timestamp::from_secs(0)).unwrap();
        let (sim, _) = sds.release();
        assert_eq!(sim.commands, [Command::Wakeup, Command::PassiveMode]);
    }

    #[test]
    fn test_command_retried_after_bad_ack() {
        let mut sim = SimulatedSds011::new();
        sim.corrupt_replies = 1;
        let mut sds = driver(sim);
        assert_eq!(sds.set_passive_mode(), Ok(()));
        let (sim, _) = sds.release();
        assert_eq!(sim.commands, [Command::PassiveMode, Command::PassiveMode]);
    }

    #[test]
    fn test_query_info() {
        let mut sim = SimulatedSds011::new();
        sim.firmware = [18, 11, 16];
        sim.device_id = 0xBEEF;
        let mut sds = driver(sim);
        let info = sds.query_info().unwrap();
        assert_eq!(info.device_id, 0xBEEF);
        assert_eq!(info.firmware.day, 16);
    }

    #[test]
    fn test_poll_refuses_before_warmup() {
        let mut sds = driver(SimulatedSds011::new());
        let t0 = Timestamp::from_secs(1000);
        sds.wakeup(t0).unwrap();
        assert_eq!(sds.poll(0, t0.add_secs(5)), Err(Sds011Error::NotReady));
        let (sim, _) = sds.release();
        assert!(!sim.commands.contains(&Command::Query));
    }

    #[test]
    fn test_poll_averages_repeat_plus_one_readings() {
        let mut sim = SimulatedSds011::new();
        sim.readings.extend([(100, 200), (120, 220), (110, 210)]);
        let mut sds = driver(sim);
        let t0 = Timestamp::from_secs(1000);
        sds.wakeup(t0).unwrap();
        let pm = sds.poll(2, t0.add_secs(20)).unwrap();
        assert!(approx(pm.pm25, 11.0));
        assert!(approx(pm.pm10, 21.0));
        let (sim, _) = sds.release();
        let queries = sim.commands.iter().filter(|c| **c == Command::Query).count();
        assert_eq!(queries, 3);
    }

    #[test]
    fn test_poll_fails_when_any_read_fails() {
        let mut sim = SimulatedSds011::new();
        // only two readings available, third query goes unanswered
        sim.readings.extend([(100, 200), (120, 220)]);
        let mut sds = driver(sim);
        let t0 = Timestamp::from_secs(1000);
        sds.wakeup(t0).unwrap();
        assert_eq!(sds.poll(2, t0.add_secs(20)), Err(Sds011Error::Timeout));
    }

    #[test]
    fn test_restart_warmup_only_when_running() {
        let mut sds = driver(SimulatedSds011::new());
        let t0 = Timestamp::from_secs(1000);
        sds.restart_warmup(t0);
        assert!(!sds.is_running());
        sds.wakeup(t0).unwrap();
        sds.restart_warmup(t0.add_secs(15));
        assert!(!sds.is_ready(t0.add_secs(20)));
        assert!(sds.is_ready(t0.add_secs(35)));
    }
}
