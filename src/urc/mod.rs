//! Unsolicited result codes.
//!
//! Two notifications matter to the session:
//!
//! | Prefix                | Framer                 | Effect                       |
//! |-----------------------|------------------------|------------------------------|
//! | `+QIURC: "recv",`     | [`recv::frame_incoming`] | payload into the channel     |
//! | `+QIURC: "dnsgip",`   | [`dnsgip::frame_domain`] | address to the rendezvous    |
//!
//! The prefixes are literal and never overlap, so the first one the line
//! equals selects the framer.

pub mod dnsgip;
pub mod recv;

use core::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, warn};

use crate::at::{ByteSource, UrcHandler};
use crate::channel::ChannelTable;
use crate::error::{Error, FrameError};
use crate::resolver::Rendezvous;

use self::dnsgip::DomainFrame;

pub const RECV_PREFIX: &str = "+QIURC: \"recv\",";
pub const DNSGIP_PREFIX: &str = "+QIURC: \"dnsgip\",";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    IncomingData,
    DomainResult,
}

/// Prefix table, indexed by the parser's match position.
pub const NOTIFICATIONS: [(&str, Notification); 2] = [
    (RECV_PREFIX, Notification::IncomingData),
    (DNSGIP_PREFIX, Notification::DomainResult),
];

static PREFIXES: [&str; 2] = [NOTIFICATIONS[0].0, NOTIFICATIONS[1].0];

/// Accumulate a decimal field up to `terminator`.
///
/// At most `max_digits` digits are accepted and at least one is required.
pub fn read_decimal(
    src: &mut dyn ByteSource,
    terminator: u8,
    max_digits: usize,
) -> Result<u32, FrameError> {
    let mut value: u32 = 0;
    let mut digits = 0;
    loop {
        let b = src.read_byte().ok_or(FrameError::StreamClosed)?;
        match b {
            b'0'..=b'9' => {
                digits += 1;
                if digits > max_digits {
                    return Err(FrameError::Overflow);
                }
                value = value * 10 + u32::from(b - b'0');
            }
            _ if b == terminator && digits > 0 => return Ok(value),
            _ => return Err(FrameError::Malformed),
        }
    }
}

/// Abandoned notifications, written by the parser task and read by the
/// session.
pub struct DesyncLog {
    count: AtomicU32,
    last: Mutex<CriticalSectionRawMutex, Cell<Option<FrameError>>>,
}

impl DesyncLog {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last: Mutex::new(Cell::new(None)),
        }
    }

    pub fn record(&self, e: FrameError) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.last.lock(|last| last.set(Some(e)));
    }

    /// Notifications abandoned so far.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// The most recent framing failure as an [`Error::Desync`].
    pub fn last(&self) -> Option<Error> {
        self.last.lock(Cell::get).map(Error::from)
    }
}

impl Default for DesyncLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes matched notifications to their framers.
pub struct Dispatcher {
    channels: Arc<ChannelTable>,
    rendezvous: Arc<Rendezvous>,
    desync: Arc<DesyncLog>,
}

impl Dispatcher {
    pub fn new(
        channels: Arc<ChannelTable>,
        rendezvous: Arc<Rendezvous>,
        desync: Arc<DesyncLog>,
    ) -> Self {
        Self {
            channels,
            rendezvous,
            desync,
        }
    }

    /// Frame one notification whose prefix has already been consumed.
    pub fn dispatch(
        &self,
        which: Notification,
        stream: &mut dyn ByteSource,
    ) -> Result<(), FrameError> {
        match which {
            Notification::IncomingData => {
                let (id, len) = recv::frame_incoming(stream, &self.channels)?;
                debug!("SOCK[{}]: {} bytes received", id, len);
            }
            Notification::DomainResult => match dnsgip::frame_domain(stream)? {
                DomainFrame::Address(addr) => {
                    if self.rendezvous.post(addr) {
                        debug!("DNS: resolved {}", addr);
                    }
                }
                DomainFrame::Header { error: 0 } => debug!("DNS: lookup accepted"),
                DomainFrame::Header { error } => warn!("DNS: modem reported error {}", error),
            },
        }
        Ok(())
    }
}

impl UrcHandler for Dispatcher {
    fn prefixes(&self) -> &[&'static str] {
        &PREFIXES
    }

    fn handle(&mut self, index: usize, stream: &mut dyn ByteSource) {
        let Some(&(_, which)) = NOTIFICATIONS.get(index) else {
            return;
        };
        if let Err(e) = self.dispatch(which, stream) {
            warn!("URC: {:?} abandoned: {}", which, e);
            self.desync.record(e);
        }
    }
}
