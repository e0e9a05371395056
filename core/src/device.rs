//! Device state machine
//!
//! One observation cycle:
//!
//! ```text
//! join -> warmup -> (ready) read, power down, send -> TxPending
//!      -> TxComplete -> TxDone -> sleep interval -> warmup -> ...
//! ```
//!
//! [`Device::tick`] runs exactly one branch of the machine and then lets
//! the radio deliver one event. Everything is cooperative and single
//! threaded; radio events are handled inline by [`Device::handle_event`].

use embedded_hal::delay::DelayNs;
use pm_sensor_hal::{
    battery::BatteryMonitor,
    radio::{Radio, RadioEvent, UplinkId},
    rtc::{Rtc, Timestamp},
};

use crate::{
    battery::{self, BatteryReading, BatteryState},
    config::{BatteryConfig, DeviceConfig},
    payload,
    sensors::{SensorSuite, StatusFlag},
};

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Radio not initialized yet
    Uninitialized,
    /// Radio initialized, no session confirmed by this machine
    Idle,
    /// Session established
    Joined,
    /// Uplink queued, waiting for its completion
    TxPending,
    /// Uplink completed
    TxDone,
    /// Join failed or gave up
    NotJoined,
    /// Link dead, radio needs a reset
    ErrorState,
}

/// Branch taken by a [`Device::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// No session; slept one interval
    JoinFailed,
    /// Started sensor warmup
    WarmingUp,
    /// Cycle finished; slept one interval and started the next warmup
    Slept,
    /// Sent an uplink carrying only the sensor error bits
    ErrorReported,
    /// Sampled the sensors and sent the uplink
    Sampled,
    /// Uplink never completed; gave up, slept and started the next warmup
    TxTimedOut,
    /// Nothing to do yet
    Waiting,
}

/// The node: radio, clock, sensors and battery under one state machine
pub struct Device<R, C, M, B, D> {
    radio: R,
    rtc: C,
    sensors: M,
    battery: B,
    delay: D,
    config: DeviceConfig,
    battery_config: BatteryConfig,
    state: DeviceState,
    join_attempts: u8,
    pending: Option<UplinkId>,
    queued_at: Option<Timestamp>,
}

impl<R, C, M, B, D> Device<R, C, M, B, D>
where
    R: Radio,
    C: Rtc,
    M: SensorSuite,
    B: BatteryMonitor,
    D: DelayNs,
{
    /// Create a device with the default configuration
    pub fn new(radio: R, rtc: C, sensors: M, battery: B, delay: D) -> Self {
        Self {
            radio,
            rtc,
            sensors,
            battery,
            delay,
            config: DeviceConfig::default(),
            battery_config: BatteryConfig::default(),
            state: DeviceState::Uninitialized,
            join_attempts: 0,
            pending: None,
            queued_at: None,
        }
    }

    /// Replace the state machine configuration
    pub fn with_config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the battery divider configuration
    pub fn with_battery_config(mut self, config: BatteryConfig) -> Self {
        self.battery_config = config;
        self
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Uplink waiting for its completion
    pub fn pending(&self) -> Option<UplinkId> {
        self.pending
    }

    /// The radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The radio, mutably
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// The clock
    pub fn rtc(&self) -> &C {
        &self.rtc
    }

    /// The clock, mutably
    pub fn rtc_mut(&mut self) -> &mut C {
        &mut self.rtc
    }

    /// The sensor suite
    pub fn sensors(&self) -> &M {
        &self.sensors
    }

    /// The sensor suite, mutably
    pub fn sensors_mut(&mut self) -> &mut M {
        &mut self.sensors
    }

    /// Initialize the radio
    pub fn start(&mut self) {
        info!("Starting node");
        self.reinit();
    }

    /// Run forever
    pub fn run(mut self) -> ! {
        if self.state == DeviceState::Uninitialized {
            self.start();
        }
        loop {
            self.tick();
        }
    }

    /// Run one branch of the state machine, then one radio scheduler pass
    pub fn tick(&mut self) -> Step {
        let step = self.step();
        trace!("{:?} -> {:?}", step, self.state);
        self.run_radio_once();
        step
    }

    fn step(&mut self) -> Step {
        match self.state {
            DeviceState::Uninitialized => self.start(),
            DeviceState::ErrorState => {
                warn!("Link dead, resetting radio");
                self.reinit();
            }
            _ => {}
        }

        if !self.join(self.config.join_attempts) {
            self.sensors.off();
            self.sleep();
            self.clear_pending();
            self.state = DeviceState::Idle;
            return Step::JoinFailed;
        }

        let now = self.rtc.now();
        let warming = self
            .sensors
            .readings()
            .status
            .contains(StatusFlag::Warmup);

        match self.state {
            DeviceState::Idle | DeviceState::Joined if !warming => {
                self.sensors.warmup(now);
                Step::WarmingUp
            }
            DeviceState::TxDone | DeviceState::NotJoined => {
                self.next_cycle();
                Step::Slept
            }
            DeviceState::TxPending if self.tx_expired(now) => {
                warn!(
                    "Uplink not completed within {} secs, giving up",
                    self.config.tx_timeout_secs
                );
                self.next_cycle();
                Step::TxTimedOut
            }
            DeviceState::Idle | DeviceState::Joined if self.sensors.has_error() => {
                self.measure_battery();
                self.send();
                Step::ErrorReported
            }
            DeviceState::Idle | DeviceState::Joined if self.sensors.ready(now) => {
                self.sensors.read(self.config.verbose, now);
                self.measure_battery();
                self.sensors.off();
                self.send();
                Step::Sampled
            }
            _ => Step::Waiting,
        }
    }

    /// Drop the radio job, sleep one interval and start the next warmup
    fn next_cycle(&mut self) {
        self.radio.clear_tx();
        self.clear_pending();
        if self.sensors.particulate_running() {
            self.sensors.off();
        }
        self.sleep();
        let now = self.rtc.now();
        self.sensors.warmup(now);
        self.state = DeviceState::Joined;
    }

    fn tx_expired(&self, now: Timestamp) -> bool {
        self.queued_at.is_some_and(|queued| {
            now.millis_since(queued) / 1000 >= u64::from(self.config.tx_timeout_secs)
        })
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.queued_at = None;
    }

    /// Make sure a session exists, joining up to `repeat` times
    ///
    /// After an exhausted run the next call backs off without an attempt and
    /// re-arms the counter.
    pub fn join(&mut self, repeat: u8) -> bool {
        if self.radio.is_joined() {
            return true;
        }

        if self.join_attempts >= repeat {
            warn!("Join attempts exhausted, backing off");
            self.state = DeviceState::NotJoined;
            self.join_attempts = 0;
            return false;
        }

        let timeout_ms = self.config.join_timeout_secs.saturating_mul(1000);
        while self.join_attempts < repeat {
            self.join_attempts += 1;
            info!("Joining ({}/{})", self.join_attempts, repeat);
            if self.radio.start_join().is_err() {
                warn!("Join request rejected by radio");
                continue;
            }
            self.wait_idle(timeout_ms);
            if self.radio.is_joined() {
                self.join_attempts = 0;
                return true;
            }
        }

        error!("Join failed after {} attempts", repeat);
        self.state = DeviceState::NotJoined;
        false
    }

    /// React to a radio notification
    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Joining => debug!("Joining..."),
            RadioEvent::Joined => {
                info!("Joined");
                self.state = DeviceState::Joined;
                self.join_attempts = 0;
            }
            RadioEvent::JoinFailed | RadioEvent::RejoinFailed | RadioEvent::JoinNotAccepted => {
                warn!("Join failed: {:?}", event);
                self.state = DeviceState::NotJoined;
            }
            RadioEvent::TxStart => debug!("TX start"),
            RadioEvent::TxComplete { uplink, flags } => {
                if self.state == DeviceState::TxPending && self.pending == Some(uplink) {
                    info!("Uplink {} complete", uplink.0);
                    if flags.downlink {
                        debug!("Downlink received, ack {}", flags.ack);
                    }
                    self.state = DeviceState::TxDone;
                } else {
                    debug!("Ignoring completion of uplink {}", uplink.0);
                }
            }
            RadioEvent::RxComplete => debug!("RX complete"),
            RadioEvent::LinkDead => {
                warn!("Link dead");
                self.state = DeviceState::ErrorState;
            }
            RadioEvent::LinkAlive => {
                info!("Link alive");
                self.state = DeviceState::Idle;
            }
            RadioEvent::Reset => debug!("MAC reset"),
            RadioEvent::NetworkTime {
                gps_secs,
                elapsed_ms,
            } => {
                let now = Timestamp::from_gps(gps_secs, elapsed_ms);
                self.rtc.set_clock(now.unix_secs);
                let (h, m, s) = now.time_of_day();
                info!("Clock set to {}:{}:{} UTC", h, m, s);
                let now = self.rtc.now();
                self.sensors.restart_warmup(now);
            }
        }

        // a token is only meaningful while its completion is awaited
        if self.state != DeviceState::TxPending && self.pending.is_some() {
            self.clear_pending();
        }
    }

    /// Battery level byte for `DevStatusAns`
    pub fn battery_level(&mut self) -> u8 {
        let volts = self
            .battery
            .read_raw()
            .map(|raw| battery::volts_from_raw(raw, &self.battery_config));
        battery::mac_battery_level(volts, &self.battery_config)
    }

    fn reinit(&mut self) {
        self.clear_pending();
        match self.radio.initialize() {
            Ok(()) => self.state = DeviceState::Idle,
            Err(_) => {
                error!("Radio initialization failed");
                self.state = DeviceState::ErrorState;
            }
        }
    }

    fn send(&mut self) {
        if matches!(self.state, DeviceState::Idle | DeviceState::ErrorState) {
            self.reinit();
        }
        if let Some(pending) = self.pending {
            debug!("Uplink {} still pending", pending.0);
            return;
        }
        if !self.join(1) {
            return;
        }
        if self.radio.is_busy() {
            warn!("Radio busy, uplink skipped");
            return;
        }

        let interval = self.config.network_time_interval;
        if interval != 0 && self.radio.uplink_counter() % interval == 0 {
            debug!("Requesting network time");
            if self.radio.request_network_time().is_err() {
                warn!("Network time request failed");
            }
        }

        let payload = match payload::encode(self.sensors.readings()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Encoding failed: {:?}", e);
                return;
            }
        };

        match self.radio.send(self.config.uplink_port, &payload) {
            Ok(uplink) => {
                info!("Uplink {} queued ({} bytes)", uplink.0, payload.len());
                self.pending = Some(uplink);
                self.queued_at = Some(self.rtc.now());
                self.state = DeviceState::TxPending;
            }
            Err(_) => error!("Uplink could not be queued"),
        }
    }

    fn measure_battery(&mut self) {
        let reading = match self.battery.read_raw() {
            Some(raw) => battery::measure(raw, &self.battery_config),
            None => BatteryReading {
                volts: 0.0,
                state: BatteryState::Unavailable,
            },
        };
        self.sensors.record_battery(reading);
    }

    fn sleep(&mut self) {
        let wake_at = self
            .rtc
            .now()
            .add_secs(u64::from(self.config.observation_interval_secs));
        let (h, m, s) = wake_at.time_of_day();
        info!("Sleeping until {}:{}:{}", h, m, s);
        self.rtc.sleep_until(wake_at);
    }

    fn run_radio_once(&mut self) {
        if let Some(event) = self.radio.poll_event() {
            self.handle_event(event);
        }
    }

    /// Deliver radio events until the radio is idle or `timeout_ms` passed
    fn wait_idle(&mut self, timeout_ms: u32) {
        for _ in 0..timeout_ms {
            self.run_radio_once();
            if !self.radio.is_busy() {
                return;
            }
            self.delay.delay_ms(1);
        }
        warn!("Radio still busy after {} ms", timeout_ms);
    }
}
