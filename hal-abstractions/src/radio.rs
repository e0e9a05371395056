//! LoRaWAN radio collaborator
//!
//! The MAC engine (join procedure, session keys, duty cycle, ADR) lives
//! behind this trait. The control core only starts joins, queues uplinks
//! and reacts to the events the engine reports.
//!
//! Events are delivered synchronously: each call to [`Radio::poll_event`]
//! runs the MAC scheduler once and hands back whatever it produced. There
//! is no independent thread, so the core's state can be mutated without
//! locking.

/// Identifier of a queued uplink (the frame counter the MAC assigned)
///
/// Completion events carry the same identifier, which lets the caller tell
/// its own uplinks apart from MAC-initiated exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UplinkId(pub u32);

/// What came back in the receive windows after an uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxFlags {
    /// A downlink was received in RX1 or RX2
    pub downlink: bool,
    /// The downlink acknowledged a confirmed uplink
    pub ack: bool,
    /// The downlink only carried MAC commands (no application port)
    pub mac_only: bool,
}

/// Notifications from the MAC engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// Join procedure started
    Joining,
    /// Join accepted, session established
    Joined,
    /// Join procedure gave up
    JoinFailed,
    /// Rejoin after a lost session failed
    RejoinFailed,
    /// Join request sent but no join-accept received
    JoinNotAccepted,
    /// Transmission started
    TxStart,
    /// Uplink sent and receive windows closed
    TxComplete {
        /// Uplink this completion belongs to
        uplink: UplinkId,
        /// Downlink details
        flags: TxFlags,
    },
    /// Downlink received outside a TX cycle
    RxComplete,
    /// Link check failed, no downlinks for too long
    LinkDead,
    /// Link recovered after `LinkDead`
    LinkAlive,
    /// MAC state was reset
    Reset,
    /// Answer to a network time request
    NetworkTime {
        /// Network time, seconds since the GPS epoch
        gps_secs: u64,
        /// Local milliseconds elapsed since the network time reference
        elapsed_ms: u64,
    },
}

/// LoRaWAN MAC engine
pub trait Radio {
    /// Error type for radio operations
    type Error: core::fmt::Debug;

    /// Reset the MAC state; the session and pending uplinks are discarded
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Whether a session (device address) exists
    fn is_joined(&self) -> bool;

    /// Whether a join or TX/RX cycle is still in progress
    fn is_busy(&self) -> bool;

    /// Start one OTAA join attempt
    fn start_join(&mut self) -> Result<(), Self::Error>;

    /// Queue an unconfirmed uplink on `port`
    fn send(&mut self, port: u8, payload: &[u8]) -> Result<UplinkId, Self::Error>;

    /// Run the MAC scheduler once and return the event it produced, if any
    fn poll_event(&mut self) -> Option<RadioEvent>;

    /// Drop any scheduled but not yet transmitted uplink
    fn clear_tx(&mut self);

    /// Uplink frame counter of the current session
    fn uplink_counter(&self) -> u32;

    /// Piggyback a network time request (DeviceTimeReq) on the next uplink
    fn request_network_time(&mut self) -> Result<(), Self::Error>;
}
