//! Simulated hardware for unit tests

use core::{cell::RefCell, convert::Infallible};
use std::{collections::VecDeque, rc::Rc};

use embedded_io::{ErrorType, Read, ReadReady, Write};
use pm_sensor_hal::{
    battery::BatteryMonitor,
    climate::{ClimateSensor, HeatedSensor, PressureSensor},
    radio::{Radio, RadioEvent, TxFlags, UplinkId},
    rtc::{Rtc, Timestamp},
};

use crate::{
    battery::BatteryReading,
    sds011::{response_checksum, Command, COMMAND_LEN, RESPONSE_LEN},
    sensors::{Readings, SensorSuite, StatusFlag},
};

/// Build a valid response frame
pub fn response_frame(code: u8, payload: [u8; 6]) -> [u8; RESPONSE_LEN] {
    let mut frame = [0u8; RESPONSE_LEN];
    frame[0] = 0xAA;
    frame[1] = code;
    frame[2..8].copy_from_slice(&payload);
    frame[8] = response_checksum(&frame);
    frame[9] = 0xAB;
    frame
}

/// SDS011 on the other end of the serial line
///
/// Decodes the command frames written to it and queues the replies the
/// real sensor would send.
pub struct SimulatedSds011 {
    /// Commands received, in order
    pub commands: Vec<Command>,
    /// (PM2.5, PM10) raw values for upcoming queries; empty means no reply
    pub readings: VecDeque<(u16, u16)>,
    /// Never reply
    pub silent: bool,
    /// Number of upcoming replies sent with a broken checksum
    pub corrupt_replies: usize,
    /// Firmware date (year, month, day)
    pub firmware: [u8; 3],
    /// Device id
    pub device_id: u16,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
}

impl SimulatedSds011 {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            readings: VecDeque::new(),
            silent: false,
            corrupt_replies: 0,
            firmware: [18, 11, 16],
            device_id: 0xA160,
            rx: Vec::new(),
            tx: VecDeque::new(),
        }
    }

    fn receive(&mut self, byte: u8) {
        if self.rx.is_empty() && byte != 0xAA {
            return;
        }
        self.rx.push(byte);
        if self.rx.len() < COMMAND_LEN {
            return;
        }
        let mut frame = [0u8; COMMAND_LEN];
        frame.copy_from_slice(&self.rx);
        self.rx.clear();
        if let Ok(command) = Command::decode(&frame) {
            self.respond(command);
        }
    }

    fn respond(&mut self, command: Command) {
        self.commands.push(command);
        if self.silent {
            return;
        }
        let [id_hi, id_lo] = self.device_id.to_be_bytes();
        let mut frame = match command {
            Command::Query => {
                let Some((pm25, pm10)) = self.readings.pop_front() else {
                    return;
                };
                let [a, b] = pm25.to_le_bytes();
                let [c, d] = pm10.to_le_bytes();
                response_frame(0xC0, [a, b, c, d, id_hi, id_lo])
            }
            Command::FirmwareInfo => {
                let [year, month, day] = self.firmware;
                response_frame(0xC5, [0x07, year, month, day, id_hi, id_lo])
            }
            other => {
                let [d1, d2] = other.data();
                response_frame(0xC5, [other.code(), d1, d2, 0x00, id_hi, id_lo])
            }
        };
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            frame[8] = frame[8].wrapping_add(1);
        }
        self.tx.extend(frame);
    }
}

impl ErrorType for SimulatedSds011 {
    type Error = Infallible;
}

impl Read for SimulatedSds011 {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.tx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for SimulatedSds011 {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.tx.is_empty())
    }
}

impl Write for SimulatedSds011 {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for b in buf {
            self.receive(*b);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Default)]
struct ClimateLog {
    probed: Vec<usize>,
    values: (f32, f32, f32),
    sleeps: usize,
    heater_pulses: usize,
    resets: usize,
}

/// Shared record of what the fake climate sensors were asked to do
#[derive(Default, Clone)]
pub struct ProbeLog(Rc<RefCell<ClimateLog>>);

impl ProbeLog {
    /// Indices of the probed candidates, in probe order
    pub fn probed(&self) -> Vec<usize> {
        self.0.borrow().probed.clone()
    }

    /// Values every fake reports from now on
    pub fn set_climate(&self, temperature: f32, humidity: f32, pressure: f32) {
        self.0.borrow_mut().values = (temperature, humidity, pressure);
    }

    pub fn sleeps(&self) -> usize {
        self.0.borrow().sleeps
    }

    pub fn heater_pulses(&self) -> usize {
        self.0.borrow().heater_pulses
    }

    pub fn resets(&self) -> usize {
        self.0.borrow().resets
    }
}

/// Climate sensor standing in for any of the three chips
pub struct FakeClimate {
    log: ProbeLog,
    index: usize,
    answers: bool,
}

impl FakeClimate {
    pub fn new(log: &ProbeLog, index: usize, answers: bool) -> Self {
        Self {
            log: log.clone(),
            index,
            answers,
        }
    }
}

impl ClimateSensor for FakeClimate {
    fn probe(&mut self) -> bool {
        self.log.0.borrow_mut().probed.push(self.index);
        self.answers
    }

    fn read_temperature_humidity(&mut self) -> (f32, f32) {
        let (t, h, _) = self.log.0.borrow().values;
        (t, h)
    }
}

impl PressureSensor for FakeClimate {
    fn read_pressure(&mut self) -> f32 {
        self.log.0.borrow().values.2
    }

    fn sleep(&mut self) {
        self.log.0.borrow_mut().sleeps += 1;
    }
}

impl HeatedSensor for FakeClimate {
    fn set_heater(&mut self, on: bool) {
        if on {
            self.log.0.borrow_mut().heater_pulses += 1;
        }
    }

    fn reset(&mut self) {
        self.log.0.borrow_mut().resets += 1;
    }
}

/// LoRaWAN MAC that completes every exchange on its own
pub struct FakeRadio {
    pub joined: bool,
    pub accept_join: bool,
    pub fail_send: bool,
    pub inits: u32,
    pub join_requests: u32,
    pub time_requests: u32,
    pub cleared: u32,
    pub counter: u32,
    pub sent: Vec<(u8, Vec<u8>)>,
    pub events: VecDeque<RadioEvent>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            joined: false,
            accept_join: true,
            fail_send: false,
            inits: 0,
            join_requests: 0,
            time_requests: 0,
            cleared: 0,
            counter: 0,
            sent: Vec::new(),
            events: VecDeque::new(),
        }
    }
}

impl Radio for FakeRadio {
    type Error = ();

    fn initialize(&mut self) -> Result<(), ()> {
        self.inits += 1;
        self.joined = false;
        self.events.clear();
        Ok(())
    }

    fn is_joined(&self) -> bool {
        self.joined
    }

    fn is_busy(&self) -> bool {
        !self.events.is_empty()
    }

    fn start_join(&mut self) -> Result<(), ()> {
        self.join_requests += 1;
        self.events.push_back(RadioEvent::Joining);
        self.events.push_back(if self.accept_join {
            RadioEvent::Joined
        } else {
            RadioEvent::JoinNotAccepted
        });
        Ok(())
    }

    fn send(&mut self, port: u8, payload: &[u8]) -> Result<UplinkId, ()> {
        if self.fail_send {
            return Err(());
        }
        let uplink = UplinkId(self.counter);
        self.counter += 1;
        self.sent.push((port, payload.to_vec()));
        self.events.push_back(RadioEvent::TxStart);
        self.events.push_back(RadioEvent::TxComplete {
            uplink,
            flags: TxFlags::default(),
        });
        Ok(uplink)
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        let event = self.events.pop_front();
        if event == Some(RadioEvent::Joined) {
            self.joined = true;
        }
        event
    }

    fn clear_tx(&mut self) {
        self.cleared += 1;
    }

    fn uplink_counter(&self) -> u32 {
        self.counter
    }

    fn request_network_time(&mut self) -> Result<(), ()> {
        self.time_requests += 1;
        Ok(())
    }
}

/// Clock that jumps straight to the alarm on sleep
pub struct FakeRtc {
    pub now: Timestamp,
    pub sleeps: Vec<Timestamp>,
}

impl FakeRtc {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            sleeps: Vec::new(),
        }
    }
}

impl Rtc for FakeRtc {
    fn now(&mut self) -> Timestamp {
        self.now
    }

    fn sleep_until(&mut self, wake_at: Timestamp) {
        self.sleeps.push(wake_at);
        self.now = wake_at;
    }

    fn set_clock(&mut self, unix_secs: u64) {
        self.now = Timestamp::from_secs(unix_secs);
    }
}

/// Fixed raw ADC value
pub struct FakeBattery(pub Option<u16>);

impl BatteryMonitor for FakeBattery {
    fn read_raw(&mut self) -> Option<u16> {
        self.0
    }
}

/// Sensor suite whose readiness is set by the test
#[derive(Default)]
pub struct FakeSensors {
    pub readings: Readings,
    pub ready: bool,
    pub running: bool,
    pub warmups: u32,
    pub offs: u32,
    pub reads: u32,
    pub restarts: Vec<Timestamp>,
}

impl SensorSuite for FakeSensors {
    fn warmup(&mut self, _now: Timestamp) {
        self.warmups += 1;
        self.running = true;
        self.readings.status.insert(StatusFlag::Warmup);
    }

    fn off(&mut self) {
        self.offs += 1;
        self.running = false;
        self.readings.status.remove(StatusFlag::Warmup);
    }

    fn read(&mut self, _verbose: bool, _now: Timestamp) {
        self.reads += 1;
        self.readings.pm25 = 12.5;
        self.readings.pm10 = 20.0;
    }

    fn ready(&self, _now: Timestamp) -> bool {
        self.ready && !self.has_error()
    }

    fn particulate_running(&self) -> bool {
        self.running
    }

    fn restart_warmup(&mut self, now: Timestamp) {
        self.restarts.push(now);
    }

    fn record_battery(&mut self, battery: BatteryReading) {
        self.readings.vbat = battery.volts;
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }
}
