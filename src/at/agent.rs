//! AT agent: one parser task, many callers.
//!
//! ```text
//!  caller ──exec()──► gate ─► pending slot ─► write cmd ─► recv_timeout(done)
//!                                 ▲                              ▲
//!  UART ─► at-parser task ─► RecvCache ─┬─ marker hit ───────────┤
//!                                       ├─ OK / ERROR line ──────┘
//!                                       ├─ other line ─► pending body
//!                                       └─ URC prefix ─► UrcHandler (owns stream)
//! ```
//!
//! The parser task is the only reader of the port.  Callers never touch
//! inbound bytes; they install a pending slot and wait for the parser to
//! complete it.  Each command carries a generation number so a completion
//! that races a caller's timeout is recognised and dropped by the next
//! command instead of being mistaken for its own.

use core::cell::RefCell;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};

use super::cache::{CacheEvent, LineKind, RecvCache, classify};
use super::port::{AtPort, Body, Echo, EchoStatus};
use super::serial::SerialPort;
use super::stream::{StreamReader, UrcHandler};
use crate::error::Result;
use crate::task;

/// Longest marker an `exec_until` may wait for.
const EXPECT_CAP: usize = 64;

/// How long the parser blocks on an idle port before checking for stop.
const IDLE_POLL: Duration = Duration::from_millis(100);

type Completion = (u32, Echo);

struct Pending {
    generation: u32,
    expect: Option<heapless::String<EXPECT_CAP>>,
    body: Body,
}

/// State shared between callers and the parser task.
struct Shared {
    pending: Mutex<CriticalSectionRawMutex, RefCell<Option<Pending>>>,
    done_tx: Sender<Completion>,
    stop: AtomicBool,
}

impl Shared {
    fn finish(&self, pending: Pending, status: EchoStatus) {
        let echo = Echo {
            status,
            body: pending.body,
        };
        if self.done_tx.try_send((pending.generation, echo)).is_err() {
            warn!("AT: completion dropped (gen {})", pending.generation);
        }
    }
}

/// Transport primitive over a [`SerialPort`].
pub struct AtAgent<P: SerialPort> {
    port: Arc<P>,
    shared: Arc<Shared>,
    done_rx: Receiver<Completion>,
    /// Serialises commands; holds the last generation issued.
    gate: std::sync::Mutex<u32>,
    parser: Option<std::thread::JoinHandle<()>>,
}

impl<P: SerialPort> AtAgent<P> {
    /// Take ownership of `port` and start the parser task.
    ///
    /// `byte_timeout` bounds each read a notification handler makes.
    pub fn start<H: UrcHandler>(port: P, handler: H, byte_timeout: Duration) -> Result<Self> {
        let port = Arc::new(port);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::new(Shared {
            pending: Mutex::new(RefCell::new(None)),
            done_tx,
            stop: AtomicBool::new(false),
        });

        let mut parser = Parser {
            reader: StreamReader::new(Arc::clone(&port), byte_timeout),
            cache: RecvCache::new(),
            anchor: None,
            expect_from: 0,
            handler,
            shared: Arc::clone(&shared),
        };
        let handle = task::spawn_pinned(task::AT_PARSER, move || parser.run())?;

        Ok(Self {
            port,
            shared,
            done_rx,
            gate: std::sync::Mutex::new(0),
            parser: Some(handle),
        })
    }

    fn transact(&self, timeout: Duration, data: &[u8], expect: Option<&str>) -> Echo {
        let mut generation = self
            .gate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        let id = *generation;

        // Anything still queued belongs to a command that already gave up.
        while self.done_rx.try_recv().is_ok() {}

        let expect = match expect.map(heapless::String::<EXPECT_CAP>::try_from) {
            None => None,
            Some(Ok(marker)) => Some(marker),
            Some(Err(())) => {
                warn!("AT: marker longer than {} bytes", EXPECT_CAP);
                return Echo::new(EchoStatus::Fail);
            }
        };
        self.shared.pending.lock(|slot| {
            *slot.borrow_mut() = Some(Pending {
                generation: id,
                expect,
                body: Body::new(),
            });
        });

        if let Err(e) = self.port.write_all(data) {
            warn!("AT: write failed: {:?}", e);
            self.reclaim(id);
            return Echo::new(EchoStatus::Fail);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok((g, echo)) if g == id => return echo,
                Ok((g, _)) => debug!("AT: stale completion (gen {})", g),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }

        match self.reclaim(id) {
            Some(p) => Echo {
                status: EchoStatus::Timeout,
                body: p.body,
            },
            // The parser finished it between our deadline and the reclaim.
            None => match self.done_rx.try_recv() {
                Ok((g, echo)) if g == id => echo,
                _ => Echo::new(EchoStatus::Timeout),
            },
        }
    }

    fn reclaim(&self, id: u32) -> Option<Pending> {
        self.shared
            .pending
            .lock(|slot| slot.borrow_mut().take_if(|p| p.generation == id))
    }
}

impl<P: SerialPort> AtPort for AtAgent<P> {
    fn exec(&self, timeout: Duration, cmd: &str) -> Echo {
        debug!("AT> {}", cmd.trim_end());
        self.transact(timeout, cmd.as_bytes(), None)
    }

    fn exec_until(&self, timeout: Duration, cmd: &str, expect: &str) -> EchoStatus {
        debug!("AT> {} (until {:?})", cmd.trim_end(), expect);
        self.transact(timeout, cmd.as_bytes(), Some(expect)).status
    }

    fn raw_send_until(&self, timeout: Duration, data: &[u8], expect: &str) -> EchoStatus {
        debug!("AT> <{} raw bytes> (until {:?})", data.len(), expect);
        self.transact(timeout, data, Some(expect)).status
    }
}

impl<P: SerialPort> Drop for AtAgent<P> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.parser.take() {
            if handle.join().is_err() {
                warn!("AT: parser task panicked");
            }
        }
    }
}

// ── Parser task ──────────────────────────────────────────────

/// Outcome of offering a line to the pending command.
enum LineOutcome {
    NoCommand,
    Absorbed,
    Finished(Pending, EchoStatus),
}

struct Parser<P: SerialPort, H: UrcHandler> {
    reader: StreamReader<P>,
    cache: RecvCache,
    /// Generation the marker search is anchored to.
    anchor: Option<u32>,
    /// Cache offset where that generation's marker search starts.  Bytes
    /// cached before the command was installed never satisfy its marker.
    expect_from: usize,
    handler: H,
    shared: Arc<Shared>,
}

impl<P: SerialPort, H: UrcHandler> Parser<P, H> {
    fn run(&mut self) {
        info!("AT: parser started");
        while !self.shared.stop.load(Ordering::Acquire) {
            match self.reader.poll(IDLE_POLL) {
                Ok(Some(byte)) => self.on_byte(byte),
                Ok(None) => {}
                Err(e) => {
                    warn!("AT: serial read error: {:?}", e);
                    std::thread::sleep(IDLE_POLL);
                }
            }
        }
        info!("AT: parser stopped");
    }

    fn on_byte(&mut self, byte: u8) {
        self.anchor_pending();
        let event = self.cache.push(byte, self.handler.prefixes());
        if self.cache.len() <= self.expect_from {
            // Overflow discarded the line.
            self.expect_from = 0;
        }

        if self.complete_expect() {
            self.reset_cache();
            return;
        }

        match event {
            CacheEvent::Pending => {}
            CacheEvent::Prefix(index) => {
                self.reset_cache();
                self.handler.handle(index, &mut self.reader);
            }
            CacheEvent::Line => {
                self.on_line();
                self.reset_cache();
            }
        }
    }

    fn reset_cache(&mut self) {
        self.cache.clear();
        self.expect_from = 0;
    }

    /// Start a newly installed command's marker search at the current end
    /// of the cache.
    fn anchor_pending(&mut self) {
        let current = self
            .shared
            .pending
            .lock(|slot| slot.borrow().as_ref().map(|p| p.generation));
        if current.is_some() && current != self.anchor {
            self.anchor = current;
            self.expect_from = self.cache.len();
        }
    }

    /// Complete the pending command if its marker arrived after the
    /// command was installed.
    fn complete_expect(&self) -> bool {
        let cache = &self.cache;
        let from = self.expect_from;
        let hit = self.shared.pending.lock(|slot| {
            let mut slot = slot.borrow_mut();
            let matched = slot
                .as_ref()
                .and_then(|p| p.expect.as_deref())
                .is_some_and(|marker| cache.contains_from(marker, from));
            if matched { slot.take() } else { None }
        });
        match hit {
            Some(p) => {
                self.shared.finish(p, EchoStatus::Expect);
                true
            }
            None => false,
        }
    }

    fn on_line(&self) {
        let line = self.cache.line();
        let kind = classify(line);
        if kind == LineKind::Blank {
            return;
        }

        let outcome = self.shared.pending.lock(|slot| {
            let mut slot = slot.borrow_mut();
            let Some(p) = slot.as_mut() else {
                return LineOutcome::NoCommand;
            };
            let status = match kind {
                LineKind::Fail => EchoStatus::Fail,
                LineKind::Ok if p.expect.is_none() => EchoStatus::Ok,
                // An `OK` ahead of the awaited marker is just the syntax ack.
                LineKind::Ok => return LineOutcome::Absorbed,
                _ => {
                    if p.body.push_str(line).is_err() || p.body.push('\n').is_err() {
                        debug!("AT: response body full, line dropped");
                    }
                    return LineOutcome::Absorbed;
                }
            };
            slot.take()
                .map_or(LineOutcome::Absorbed, |p| LineOutcome::Finished(p, status))
        });

        match outcome {
            LineOutcome::NoCommand => debug!("AT< (unsolicited) {}", line),
            LineOutcome::Absorbed => debug!("AT< {}", line),
            LineOutcome::Finished(p, status) => {
                debug!("AT< {} [{:?}]", line, status);
                self.shared.finish(p, status);
            }
        }
    }
}
