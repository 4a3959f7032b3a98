//! Byte-level access to the stream for notification handlers.

use core::time::Duration;

use log::warn;

use super::serial::SerialPort;

/// Blocking byte source handed to a notification handler.
///
/// `None` means the stream closed or stalled past its per-byte budget;
/// handlers abandon the frame on the first `None`.
pub trait ByteSource {
    fn read_byte(&mut self) -> Option<u8>;

    /// Fill as much of `buf` as possible, stopping at the first `None`.
    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        for (n, slot) in buf.iter_mut().enumerate() {
            match self.read_byte() {
                Some(b) => *slot = b,
                None => return n,
            }
        }
        buf.len()
    }
}

impl ByteSource for &[u8] {
    fn read_byte(&mut self) -> Option<u8> {
        let (&first, rest) = self.split_first()?;
        *self = rest;
        Some(first)
    }
}

/// A table of notification prefixes with the code that frames them.
///
/// The parser task calls [`handle`](UrcHandler::handle) as soon as the
/// current line equals `prefixes()[index]`; the handler then owns the
/// stream until it returns.
pub trait UrcHandler: Send + 'static {
    fn prefixes(&self) -> &[&'static str];
    fn handle(&mut self, index: usize, stream: &mut dyn ByteSource);
}

const READ_CHUNK: usize = 64;

/// Buffered reader over the serial port; the parser task's only way in.
pub(crate) struct StreamReader<P: SerialPort> {
    port: std::sync::Arc<P>,
    buf: [u8; READ_CHUNK],
    head: usize,
    len: usize,
    byte_timeout: Duration,
}

impl<P: SerialPort> StreamReader<P> {
    pub(crate) fn new(port: std::sync::Arc<P>, byte_timeout: Duration) -> Self {
        Self {
            port,
            buf: [0; READ_CHUNK],
            head: 0,
            len: 0,
            byte_timeout,
        }
    }

    /// Next byte, waiting at most `timeout` if the buffer is empty.
    pub(crate) fn poll(&mut self, timeout: Duration) -> Result<Option<u8>, P::Error> {
        if self.head == self.len {
            self.head = 0;
            self.len = self.port.read(&mut self.buf, timeout)?;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let b = self.buf[self.head];
        self.head += 1;
        Ok(Some(b))
    }
}

impl<P: SerialPort> ByteSource for StreamReader<P> {
    fn read_byte(&mut self) -> Option<u8> {
        match self.poll(self.byte_timeout) {
            Ok(b) => b,
            Err(e) => {
                warn!("AT: read failed inside notification: {:?}", e);
                None
            }
        }
    }
}
