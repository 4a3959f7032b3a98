//! Modem session: bring-up, channel lifecycle and the data plane.
//!
//! One `ModemSession` owns everything a single modem needs: the command
//! port, the channel table and the resolver rendezvous.  The parser task
//! shares the latter two through the [`Dispatcher`] it was started with.
//!
//! ```text
//!  connect ─► allocate ─► AT+QISTATE ─(stale?)─► AT+QICLOSE ─► AT+QIOPEN
//!                                                    until "+QIOPEN: <id>,0"
//!  send    ─► AT+QISEND=<id>,<len> until ">" ─► payload until "SEND OK"
//!  close   ─► +++ ─► AT+QICLOSE=<id> ─► free        (every step best-effort)
//!  resolve ─► arm ─► AT+QIDNSGIP ─► wait(rendezvous)
//! ```

use core::fmt::Write as _;
use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::at::port::{ESCAPE, ms};
use crate::at::{AtAgent, AtPort, SerialPort, command};
use crate::bringup::{self, BringUpReport};
use crate::channel::{ChannelId, ChannelTable, Protocol};
use crate::config::ModemConfig;
use crate::error::{Error, Result};
use crate::resolver::{Rendezvous, ResolvedAddress};
use crate::urc::{DesyncLog, Dispatcher};

/// Largest payload one `AT+QISEND` may carry.
pub const MAX_SEND: usize = 1460;

/// Short marker such as `+QIOPEN: 3,0`.
type Marker = heapless::String<24>;

fn marker(args: core::fmt::Arguments<'_>) -> Marker {
    let mut m = Marker::new();
    // Channel ids are at most two digits; the markers always fit.
    let _ = m.write_fmt(args);
    m
}

fn check_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(Error::InvalidArgument("empty host"));
    }
    if host.contains('"') {
        return Err(Error::InvalidArgument("host contains a quote"));
    }
    Ok(())
}

pub struct ModemSession<A: AtPort, D: DelayNs> {
    at: A,
    delay: Mutex<D>,
    config: ModemConfig,
    channels: Arc<ChannelTable>,
    rendezvous: Arc<Rendezvous>,
    desync: Arc<DesyncLog>,
    ready: AtomicBool,
    report: Mutex<Option<BringUpReport>>,
    /// One lookup at a time; the rendezvous has a single slot.
    resolving: Mutex<()>,
}

impl<P: SerialPort, D: DelayNs> ModemSession<AtAgent<P>, D> {
    /// Validate `config`, start the parser task on `port` and return a
    /// session that still needs [`init`](Self::init).
    pub fn open_serial(port: P, delay: D, config: ModemConfig) -> Result<Self> {
        config.validate()?;
        let channels = Arc::new(ChannelTable::new());
        let rendezvous = Arc::new(Rendezvous::new());
        let desync = Arc::new(DesyncLog::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&channels),
            Arc::clone(&rendezvous),
            Arc::clone(&desync),
        );
        let at = AtAgent::start(port, dispatcher, ms(config.urc_byte_timeout_ms))?;
        Ok(Self::with_shared(at, delay, config, channels, rendezvous, desync))
    }
}

impl<A: AtPort, D: DelayNs> ModemSession<A, D> {
    /// Session over an already running command port with fresh state.
    pub fn new(at: A, delay: D, config: ModemConfig) -> Self {
        Self::with_shared(
            at,
            delay,
            config,
            Arc::new(ChannelTable::new()),
            Arc::new(Rendezvous::new()),
            Arc::new(DesyncLog::new()),
        )
    }

    /// Session over state that a notification dispatcher already shares.
    pub fn with_shared(
        at: A,
        delay: D,
        config: ModemConfig,
        channels: Arc<ChannelTable>,
        rendezvous: Arc<Rendezvous>,
        desync: Arc<DesyncLog>,
    ) -> Self {
        Self {
            at,
            delay: Mutex::new(delay),
            config,
            channels,
            rendezvous,
            desync,
            ready: AtomicBool::new(false),
            report: Mutex::new(None),
            resolving: Mutex::new(()),
        }
    }

    /// A dispatcher feeding this session's channels and resolver.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.channels),
            Arc::clone(&self.rendezvous),
            Arc::clone(&self.desync),
        )
    }

    pub fn at(&self) -> &A {
        &self.at
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The last notification the parser had to abandon, as
    /// [`Error::Desync`], and how many it has abandoned in total.
    pub fn desync(&self) -> (Option<Error>, u32) {
        (self.desync.last(), self.desync.count())
    }

    /// Report of the successful bring-up, if any.
    pub fn report(&self) -> Option<BringUpReport> {
        *self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    // ── Bring-up ─────────────────────────────────────────────

    /// Run bring-up.  A ready session returns its earlier report without
    /// talking to the modem.
    pub fn init(&self) -> Result<BringUpReport> {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(done) = *report {
            if self.is_ready() {
                return Ok(done);
            }
        }

        info!("MODEM: bring-up starting");
        let outcome = {
            let mut delay = self.delay.lock().unwrap_or_else(PoisonError::into_inner);
            bringup::run(&self.at, &mut *delay, &self.config)
        };
        match outcome {
            Ok(done) => {
                *report = Some(done);
                self.ready.store(true, Ordering::Release);
                info!("MODEM: ready");
                Ok(done)
            }
            Err(e) => {
                *report = None;
                self.ready.store(false, Ordering::Release);
                warn!("MODEM: bring-up failed: {}", e);
                Err(e)
            }
        }
    }

    // ── Channel lifecycle ────────────────────────────────────

    /// Open a channel to `host:port`.
    ///
    /// The identifier is released again if the modem does not confirm the
    /// socket.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
        size_hint: Option<usize>,
    ) -> Result<ChannelId> {
        self.ensure_ready()?;
        check_host(host)?;
        let id = self.channels.allocate(host, port, protocol, size_hint)?;
        info!(
            "SOCK[{}]: connecting {} {}:{}",
            id,
            protocol.as_str(),
            host,
            port
        );

        match self
            .establish(id, host, port, protocol)
            .and_then(|()| self.channels.mark_established(id))
        {
            Ok(()) => {
                info!("SOCK[{}]: established", id);
                Ok(id)
            }
            Err(e) => {
                warn!("SOCK[{}]: connect failed: {}", id, e);
                self.channels.free(id);
                Err(e)
            }
        }
    }

    fn establish(&self, id: ChannelId, host: &str, port: u16, protocol: Protocol) -> Result<()> {
        let query = command(format_args!("AT+QISTATE=1,{}", id))?;
        let state = self
            .at
            .exec(ms(self.config.command_timeout_ms), &query)
            .into_ok()?;

        if state.contains(marker(format_args!("+QISTATE: {}", id)).as_str()) {
            debug!("SOCK[{}]: stale modem session, closing", id);
            let close = command(format_args!("AT+QICLOSE={}", id))?;
            // Outcome irrelevant: the open below reports the real state.
            let _ = self.at.exec(ms(self.config.command_timeout_ms), &close);
        }

        let open = command(format_args!(
            "AT+QIOPEN=1,{},\"{}\",\"{}\",{},0,1",
            id,
            protocol.as_str(),
            host,
            port
        ))?;
        let confirmed = marker(format_args!("+QIOPEN: {},0", id));
        self.at
            .exec_until(ms(self.config.open_timeout_ms), &open, &confirmed)
            .expect_marker()
    }

    /// Tear down `id`.  Both modem steps are attempted whatever the
    /// session or channel state, each best-effort; the identifier is always
    /// released.
    pub fn close(&self, id: ChannelId) {
        let was_allocated = self.channels.begin_close(id);
        // Leave data mode in case a send was cut short.
        let _ = self.at.exec(ms(self.config.escape_settle_ms), ESCAPE);
        match command(format_args!("AT+QICLOSE={}", id)) {
            Ok(cmd) => {
                let _ = self.at.exec(ms(self.config.command_timeout_ms), &cmd);
            }
            Err(e) => debug!("SOCK[{}]: {}", id, e),
        }
        self.channels.free(id);
        if was_allocated {
            info!("SOCK[{}]: closed", id);
        }
    }

    /// Close every allocated channel and mark the session not ready.
    pub fn shutdown(&self) {
        for id in self.channels.allocated_ids() {
            self.close(id);
        }
        self.ready.store(false, Ordering::Release);
        info!("MODEM: shut down");
    }

    // ── Data plane ───────────────────────────────────────────

    /// Send on a stream channel; returns the byte count written.
    pub fn send(&self, id: ChannelId, data: &[u8]) -> Result<usize> {
        self.push(id, data, ms(self.config.send_timeout_ms))
    }

    /// Send on a datagram channel; the completion wait is shorter.
    pub fn send_to(&self, id: ChannelId, data: &[u8]) -> Result<usize> {
        self.push(id, data, ms(self.config.datagram_send_timeout_ms))
    }

    fn push(&self, id: ChannelId, data: &[u8], completion: Duration) -> Result<usize> {
        self.ensure_ready()?;
        if !self.channels.is_live(id) {
            return Err(Error::NotLive);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if data.len() > MAX_SEND {
            return Err(Error::PayloadTooLarge);
        }

        let cmd = command(format_args!("AT+QISEND={},{}", id, data.len()))?;
        self.at
            .exec_until(ms(self.config.prompt_timeout_ms), &cmd, ">")
            .expect_marker()
            .inspect_err(|e| warn!("SOCK[{}]: no send prompt: {}", id, e))?;
        self.at
            .raw_send_until(completion, data, "SEND OK")
            .expect_marker()
            .inspect_err(|e| warn!("SOCK[{}]: send failed: {}", id, e))?;
        debug!("SOCK[{}]: sent {} bytes", id, data.len());
        Ok(data.len())
    }

    /// Take buffered payload for `id`, waiting up to `timeout` (default
    /// from the config) for the first byte.
    pub fn receive(
        &self,
        id: ChannelId,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.ensure_ready()?;
        let timeout = timeout.unwrap_or(ms(self.config.recv_timeout_ms));
        self.channels.read_timed(id, buf, timeout)
    }

    // ── Resolver ─────────────────────────────────────────────

    /// Resolve `host` through the modem's DNS client.
    pub fn resolve(&self, host: &str) -> Result<ResolvedAddress> {
        self.ensure_ready()?;
        check_host(host)?;
        let cmd = command(format_args!("AT+QIDNSGIP=1,\"{}\"", host))?;

        let _one_at_a_time = self
            .resolving
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ticket = self.rendezvous.arm();
        if let Err(e) = self
            .at
            .exec(ms(self.config.dns_request_timeout_ms), &cmd)
            .status
            .acknowledged()
        {
            self.rendezvous.cancel(ticket);
            warn!("DNS: request for {} failed: {}", host, e);
            return Err(e);
        }

        let addr = self
            .rendezvous
            .wait(ticket, self.config.resolve_timeout_ms.map(ms))
            .inspect_err(|e| warn!("DNS: {} unresolved: {}", host, e))?;
        info!("DNS: {} -> {}", host, addr);
        Ok(addr)
    }
}
