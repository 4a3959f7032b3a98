//! Byte-oriented serial link to the modem.
//!
//! Methods take `&self` so the parser task and command writers can share a
//! single port behind an `Arc`; implementations serialise internally (the
//! ESP-IDF UART driver already does).

use core::time::Duration;

/// A full-duplex serial link.
pub trait SerialPort: Send + Sync + 'static {
    /// Error type for this link.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the
    /// first byte.  Returns 0 when nothing arrived in time.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;

    /// Write every byte of `data`.
    fn write_all(&self, data: &[u8]) -> Result<(), Self::Error>;
}
