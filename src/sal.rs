//! Socket abstraction layer surface.
//!
//! Upper network layers drive a modem through integer return codes:
//! non-negative for success (a channel id or a byte count), small negative
//! numbers for failure.  This module is the only place `Error` values are
//! turned into those codes.

use core::fmt::Write as _;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::at::AtPort;
use crate::channel::{ChannelId, Protocol};
use crate::error::Error;
use crate::resolver::ResolvedAddress;
use crate::session::ModemSession;

/// Success.
pub const OK: i32 = 0;
/// Generic failure.
pub const ERR_FAILED: i32 = -1;
/// `connect`: no free channel (or the arguments were unusable).
pub const ERR_ALLOC: i32 = -1;
/// `connect`: the modem did not establish the socket.
pub const ERR_ESTABLISH: i32 = -2;
/// Receive: nothing arrived before the timeout.
pub const ERR_TIMEOUT: i32 = -2;

fn channel(id: i32) -> Option<ChannelId> {
    ChannelId::try_from(id).ok()
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn connect_code(e: Error) -> i32 {
    match e {
        Error::Exhausted | Error::InvalidArgument(_) | Error::NotReady => ERR_ALLOC,
        _ => ERR_ESTABLISH,
    }
}

fn recv_code(e: Error) -> i32 {
    match e {
        Error::Timeout => ERR_TIMEOUT,
        _ => ERR_FAILED,
    }
}

/// Integer-code socket operations a modem driver offers.
pub trait SocketModule {
    fn init(&self) -> i32;
    fn connect(&self, host: &str, port: u16, proto: Protocol) -> i32;
    fn connect_with_size(&self, host: &str, port: u16, proto: Protocol, size: usize) -> i32;
    fn send(&self, id: i32, buf: &[u8]) -> i32;
    fn recv(&self, id: i32, buf: &mut [u8]) -> i32;
    fn recv_timeout(&self, id: i32, buf: &mut [u8], timeout_ms: u32) -> i32;
    /// The channel is already bound to its remote; `ip` and `port` are
    /// accepted for API shape only.
    fn sendto(&self, id: i32, ip: &str, port: u16, buf: &[u8]) -> i32;
    fn recvfrom(&self, id: i32, buf: &mut [u8]) -> i32;
    fn recvfrom_timeout(&self, id: i32, buf: &mut [u8], timeout_ms: u32) -> i32;
    fn close(&self, id: i32) -> i32;
    /// Resolve `host` into `out` as a NUL-terminated dotted quad,
    /// truncated to fit.
    fn parse_domain(&self, host: &str, out: &mut [u8]) -> i32;
    fn deinit(&self) -> i32;
}

impl<A: AtPort, D: DelayNs> ModemSession<A, D> {
    fn connect_as_code(&self, host: &str, port: u16, proto: Protocol, size: Option<usize>) -> i32 {
        match self.connect(host, port, proto, size) {
            Ok(id) => i32::from(id),
            Err(e) => connect_code(e),
        }
    }

    fn recv_as_code(&self, id: i32, buf: &mut [u8], timeout: Option<Duration>) -> i32 {
        let Some(id) = channel(id) else {
            return ERR_FAILED;
        };
        match self.receive(id, buf, timeout) {
            Ok(n) => count(n),
            Err(e) => recv_code(e),
        }
    }
}

impl<A: AtPort, D: DelayNs> SocketModule for ModemSession<A, D> {
    fn init(&self) -> i32 {
        match ModemSession::init(self) {
            Ok(_) => OK,
            Err(_) => ERR_FAILED,
        }
    }

    fn connect(&self, host: &str, port: u16, proto: Protocol) -> i32 {
        self.connect_as_code(host, port, proto, None)
    }

    fn connect_with_size(&self, host: &str, port: u16, proto: Protocol, size: usize) -> i32 {
        self.connect_as_code(host, port, proto, Some(size))
    }

    fn send(&self, id: i32, buf: &[u8]) -> i32 {
        channel(id)
            .and_then(|id| ModemSession::send(self, id, buf).ok())
            .map_or(ERR_FAILED, count)
    }

    fn recv(&self, id: i32, buf: &mut [u8]) -> i32 {
        self.recv_as_code(id, buf, None)
    }

    fn recv_timeout(&self, id: i32, buf: &mut [u8], timeout_ms: u32) -> i32 {
        self.recv_as_code(id, buf, Some(Duration::from_millis(u64::from(timeout_ms))))
    }

    fn sendto(&self, id: i32, _ip: &str, _port: u16, buf: &[u8]) -> i32 {
        channel(id)
            .and_then(|id| self.send_to(id, buf).ok())
            .map_or(ERR_FAILED, count)
    }

    fn recvfrom(&self, id: i32, buf: &mut [u8]) -> i32 {
        self.recv_as_code(id, buf, None)
    }

    fn recvfrom_timeout(&self, id: i32, buf: &mut [u8], timeout_ms: u32) -> i32 {
        self.recv_as_code(id, buf, Some(Duration::from_millis(u64::from(timeout_ms))))
    }

    fn close(&self, id: i32) -> i32 {
        match channel(id) {
            Some(id) => {
                ModemSession::close(self, id);
                OK
            }
            None => ERR_FAILED,
        }
    }

    fn parse_domain(&self, host: &str, out: &mut [u8]) -> i32 {
        let Ok(addr) = self.resolve(host) else {
            return ERR_FAILED;
        };
        let text = dotted_quad(addr);
        write_c_str(text.as_bytes(), out);
        OK
    }

    fn deinit(&self) -> i32 {
        self.shutdown();
        OK
    }
}

fn dotted_quad(addr: ResolvedAddress) -> heapless::String<16> {
    let mut s = heapless::String::new();
    // "255.255.255.255" is 15 bytes.
    let _ = write!(s, "{addr}");
    s
}

/// Copy `src` into `out` with a trailing NUL, truncating like `snprintf`.
fn write_c_str(src: &[u8], out: &mut [u8]) {
    let Some(room) = out.len().checked_sub(1) else {
        return;
    };
    let n = src.len().min(room);
    out[..n].copy_from_slice(&src[..n]);
    out[n] = 0;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds the one registered socket module.
#[derive(Default)]
pub struct ModuleRegistry {
    module: Option<Box<dyn SocketModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module`, first tearing down and dropping any previous one.
    pub fn register(&mut self, module: Box<dyn SocketModule>) -> i32 {
        if self.unregister().is_some() {
            info!("SAL: previous module replaced");
        }
        self.module = Some(module);
        OK
    }

    /// Tear down and drop any registered module, then build its
    /// replacement with `open` and register that.
    ///
    /// The previous module is gone (its parser task joined) before `open`
    /// runs, so two sessions never share the link.  If `open` fails the
    /// registry is left empty.
    pub fn register_with<E>(
        &mut self,
        open: impl FnOnce() -> core::result::Result<Box<dyn SocketModule>, E>,
    ) -> core::result::Result<i32, E> {
        if let Some(previous) = self.unregister() {
            drop(previous);
            info!("SAL: previous module released");
        }
        self.module = Some(open()?);
        Ok(OK)
    }

    /// Deinitialise and hand back the registered module.
    pub fn unregister(&mut self) -> Option<Box<dyn SocketModule>> {
        let module = self.module.take()?;
        if module.deinit() != OK {
            warn!("SAL: module deinit reported failure");
        }
        Some(module)
    }

    pub fn module(&self) -> Option<&dyn SocketModule> {
        self.module.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.module.is_some()
    }

    /// Initialise the registered module.
    pub fn init(&self) -> i32 {
        self.module.as_ref().map_or(ERR_FAILED, |m| m.init())
    }
}
