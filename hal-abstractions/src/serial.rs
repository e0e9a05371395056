//! Serial port of the particulate sensor
//!
//! Any UART that implements the blocking `embedded-io` traits can carry the
//! sensor protocol. `ReadReady` is needed so reads can be polled against a
//! timeout instead of blocking forever on a silent sensor.

use embedded_io::{Read, ReadReady, Write};

/// Blocking UART with non-blocking readiness check
pub trait SerialPort: Read + Write + ReadReady {}

impl<T> SerialPort for T where T: Read + Write + ReadReady {}
