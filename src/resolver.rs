//! Domain resolution rendezvous.
//!
//! The caller issuing `AT+QIDNSGIP` and the parser task framing the
//! `dnsgip` notification meet here.  The slot holds at most one address;
//! each call arms it with a fresh generation so an answer that arrives
//! after its caller gave up is dropped instead of satisfying the next
//! lookup.

use core::cell::RefCell;
use core::fmt;
use core::net::Ipv4Addr;
use core::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::debug;
use std::time::Instant;

use crate::error::{Error, Result};

/// Four address segments as reported by the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress(pub [u8; 4]);

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl From<ResolvedAddress> for Ipv4Addr {
    fn from(addr: ResolvedAddress) -> Self {
        Self::from(addr.0)
    }
}

/// Proof of arming; only the holder's generation is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u32);

struct Slot {
    generation: u32,
    armed: bool,
}

pub struct Rendezvous {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot>>,
    tx: Sender<(u32, ResolvedAddress)>,
    rx: Receiver<(u32, ResolvedAddress)>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                generation: 0,
                armed: false,
            })),
            tx,
            rx,
        }
    }

    /// Reset to the blocked state for a new lookup.
    pub fn arm(&self) -> Ticket {
        let generation = self.slot.lock(|s| {
            let mut s = s.borrow_mut();
            s.generation = s.generation.wrapping_add(1);
            s.armed = true;
            s.generation
        });
        while self.rx.try_recv().is_ok() {}
        Ticket(generation)
    }

    /// Deliver `addr` to the armed caller, if any.  Only the first address
    /// per arming is delivered.
    pub fn post(&self, addr: ResolvedAddress) -> bool {
        let generation = self.slot.lock(|s| {
            let mut s = s.borrow_mut();
            if s.armed {
                s.armed = false;
                Some(s.generation)
            } else {
                None
            }
        });
        match generation {
            Some(g) => self.tx.try_send((g, addr)).is_ok(),
            None => {
                debug!("DNS: unsolicited address {} dropped", addr);
                false
            }
        }
    }

    /// Block until the address for `ticket` arrives.  `None` waits forever.
    pub fn wait(&self, ticket: Ticket, timeout: Option<Duration>) -> Result<ResolvedAddress> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let received = match deadline {
                Some(d) => self
                    .rx
                    .recv_timeout(d.saturating_duration_since(Instant::now())),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((g, addr)) if g == ticket.0 => return Ok(addr),
                Ok((g, _)) => debug!("DNS: stale answer (gen {}) dropped", g),
                Err(_) => {
                    self.cancel(ticket);
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Abandon `ticket`; a late answer for it will be dropped.
    pub fn cancel(&self, ticket: Ticket) {
        self.slot.lock(|s| {
            let mut s = s.borrow_mut();
            if s.generation == ticket.0 {
                s.armed = false;
            }
        });
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock(|s| s.borrow().armed)
    }
}
