//! Channel table: identifiers, remotes and receive buffers.
//!
//! The modem multiplexes up to [`MAX_CHANNELS`] sockets over the one UART.
//! Each slot follows
//!
//! ```text
//!  Unallocated ─allocate─► Allocating ─mark_established─► Established
//!       ▲                      │                               │
//!       └────────free──────────┴──────── begin_close ─► Closing ┘
//! ```
//!
//! The notification parser writes received payload into a slot's buffer
//! while caller threads read from it, so the table lives behind a
//! critical-section mutex and readers park on a per-slot doorbell.

use core::cell::RefCell;
use core::time::Duration;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Deque;
use log::{debug, warn};

use crate::error::{Error, Result};

/// Sockets the driver multiplexes.
pub const MAX_CHANNELS: usize = 6;

/// Receive buffer per channel (bytes).
pub const RX_CAPACITY: usize = 2048;

/// Longest remote host name kept per channel (DNS limit).
pub const HOST_CAP: usize = 253;

pub type ChannelId = u8;
pub type Host = heapless::String<HOST_CAP>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unallocated,
    Allocating,
    Established,
    Closing,
}

/// Transport protocol of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Service type as spelled in `AT+QIOPEN`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub host: Host,
    pub port: u16,
}

struct Slot {
    state: ChannelState,
    remote: Option<Remote>,
    protocol: Protocol,
    rx: Deque<u8, RX_CAPACITY>,
    limit: usize,
}

impl Slot {
    const fn new() -> Self {
        Self {
            state: ChannelState::Unallocated,
            remote: None,
            protocol: Protocol::Tcp,
            rx: Deque::new(),
            limit: RX_CAPACITY,
        }
    }
}

/// Fixed table of channel slots shared by callers and the parser task.
pub struct ChannelTable {
    slots: Mutex<CriticalSectionRawMutex, RefCell<[Slot; MAX_CHANNELS]>>,
    doorbells: [(Sender<()>, Receiver<()>); MAX_CHANNELS],
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

fn index(id: ChannelId) -> Result<usize> {
    let i = id as usize;
    if i < MAX_CHANNELS {
        Ok(i)
    } else {
        Err(Error::InvalidChannel)
    }
}

impl ChannelTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new(core::array::from_fn(|_| Slot::new()))),
            doorbells: core::array::from_fn(|_| crossbeam_channel::bounded(1)),
        }
    }

    fn with_slot<R>(&self, id: ChannelId, f: impl FnOnce(&mut Slot) -> R) -> Result<R> {
        let i = index(id)?;
        Ok(self.slots.lock(|slots| f(&mut slots.borrow_mut()[i])))
    }

    fn ring(&self, i: usize) {
        // A pending token already wakes the reader.
        let _ = self.doorbells[i].0.try_send(());
    }

    /// Claim the lowest free identifier for `host:port`.
    ///
    /// `size_hint` caps how many bytes the channel buffers; it is clamped
    /// to [`RX_CAPACITY`].
    pub fn allocate(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        size_hint: Option<usize>,
    ) -> Result<ChannelId> {
        let host = Host::try_from(host).map_err(|()| Error::InvalidArgument("host too long"))?;
        let limit = size_hint.map_or(RX_CAPACITY, |h| h.clamp(1, RX_CAPACITY));

        let claimed = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let (i, slot) = slots
                .iter_mut()
                .enumerate()
                .find(|(_, s)| s.state == ChannelState::Unallocated)?;
            slot.state = ChannelState::Allocating;
            slot.remote = Some(Remote { host, port });
            slot.protocol = protocol;
            slot.rx.clear();
            slot.limit = limit;
            Some(i)
        });

        let i = claimed.ok_or(Error::Exhausted)?;
        while self.doorbells[i].1.try_recv().is_ok() {}
        debug!("SOCK[{}]: allocated ({} bytes rx)", i, limit);
        Ok(i as ChannelId)
    }

    /// `Allocating -> Established`.
    pub fn mark_established(&self, id: ChannelId) -> Result<()> {
        self.with_slot(id, |s| match s.state {
            ChannelState::Allocating => {
                s.state = ChannelState::Established;
                Ok(())
            }
            _ => Err(Error::InvalidChannel),
        })?
    }

    /// Stop accepting payload ahead of the modem-side close.  Returns
    /// whether the channel was allocated.
    pub fn begin_close(&self, id: ChannelId) -> bool {
        self.with_slot(id, |s| match s.state {
            ChannelState::Unallocated => false,
            _ => {
                s.state = ChannelState::Closing;
                true
            }
        })
        .unwrap_or(false)
    }

    /// Release `id` back to the pool, discarding buffered payload.
    pub fn free(&self, id: ChannelId) {
        let Ok(i) = index(id) else { return };
        self.slots.lock(|slots| {
            let slot = &mut slots.borrow_mut()[i];
            slot.state = ChannelState::Unallocated;
            slot.remote = None;
            slot.rx.clear();
            slot.limit = RX_CAPACITY;
        });
        // Wake a reader parked on this slot so it sees the release.
        self.ring(i);
        debug!("SOCK[{}]: freed", i);
    }

    pub fn is_live(&self, id: ChannelId) -> bool {
        self.state(id) == ChannelState::Established
    }

    pub fn state(&self, id: ChannelId) -> ChannelState {
        self.with_slot(id, |s| s.state)
            .unwrap_or(ChannelState::Unallocated)
    }

    pub fn remote(&self, id: ChannelId) -> Option<Remote> {
        self.with_slot(id, |s| s.remote.clone()).ok().flatten()
    }

    pub fn protocol(&self, id: ChannelId) -> Option<Protocol> {
        self.with_slot(id, |s| (s.state != ChannelState::Unallocated).then_some(s.protocol))
            .ok()
            .flatten()
    }

    /// Bytes waiting to be read.
    pub fn buffered(&self, id: ChannelId) -> usize {
        self.with_slot(id, |s| s.rx.len()).unwrap_or(0)
    }

    /// Every identifier not in `Unallocated`.
    pub fn allocated_ids(&self) -> heapless::Vec<ChannelId, MAX_CHANNELS> {
        self.slots.lock(|slots| {
            slots
                .borrow()
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state != ChannelState::Unallocated)
                .map(|(i, _)| i as ChannelId)
                .collect()
        })
    }

    /// Append received payload for `id`.
    ///
    /// Payload may arrive between the open command and its confirmation,
    /// so `Allocating` channels accept writes too.  When the buffer is full
    /// the excess is dropped; the count kept is returned.
    pub fn write(&self, id: ChannelId, data: &[u8]) -> Result<usize> {
        let i = index(id)?;
        let kept = self.slots.lock(|slots| {
            let slot = &mut slots.borrow_mut()[i];
            match slot.state {
                ChannelState::Allocating | ChannelState::Established => {}
                ChannelState::Unallocated | ChannelState::Closing => {
                    return Err(Error::InvalidChannel);
                }
            }
            let room = slot.limit.saturating_sub(slot.rx.len());
            let kept = data.len().min(room);
            for &b in &data[..kept] {
                // `room` is bounded by the deque capacity.
                let _ = slot.rx.push_back(b);
            }
            Ok(kept)
        })?;

        if kept < data.len() {
            warn!(
                "SOCK[{}]: rx buffer full, dropped {} bytes",
                id,
                data.len() - kept
            );
        }
        if kept > 0 {
            self.ring(i);
        }
        Ok(kept)
    }

    /// Take up to `buf.len()` buffered bytes, waiting up to `timeout` for
    /// the first one.
    pub fn read_timed(&self, id: ChannelId, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let i = index(id)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let taken = self.slots.lock(|slots| {
                let slot = &mut slots.borrow_mut()[i];
                if slot.state == ChannelState::Unallocated {
                    return Err(Error::InvalidChannel);
                }
                let mut n = 0;
                while n < buf.len() {
                    let Some(b) = slot.rx.pop_front() else { break };
                    buf[n] = b;
                    n += 1;
                }
                if n == 0 && slot.state == ChannelState::Closing {
                    return Err(Error::NotLive);
                }
                Ok(n)
            })?;
            if taken > 0 {
                return Ok(taken);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.doorbells[i].1.recv_timeout(remaining).is_err() {
                return Err(Error::Timeout);
            }
        }
    }
}
