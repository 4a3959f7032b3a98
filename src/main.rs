//! CellModem firmware: main entry point.
//!
//! Brings up an EC600S on UART1, registers it as the socket module and
//! runs a short connectivity check.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  UartPort (UART1, 115200)      TaskDelay (FreeRTOS)      │
//! │        │                              │                  │
//! │  ──────┴──── SerialPort / DelayNs ────┴──────────        │
//! │                                                          │
//! │  ModemSession ── AtAgent ── at-parser task ── URCs       │
//! │        │                                                 │
//! │  ModuleRegistry (SocketModule, integer codes)            │
//! └──────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use anyhow::{Result, bail};
use esp_idf_svc::hal::peripherals::Peripherals;
use log::{info, warn};

use cellmodem::adapters::delay::TaskDelay;
use cellmodem::adapters::uart::{BAUD, UartPort};
use cellmodem::channel::Protocol;
use cellmodem::config::ModemConfig;
use cellmodem::sal::{ModuleRegistry, OK, SocketModule};
use cellmodem::session::ModemSession;

/// Host used for the post-bring-up connectivity check.
const CHECK_HOST: &str = "example.com";
const CHECK_PORT: u16 = 80;
const CHECK_REQUEST: &[u8] = b"HEAD / HTTP/1.0\r\nHost: example.com\r\n\r\n";

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  CellModem v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Modem link ─────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;
    let port = UartPort::new(peripherals.uart1, pins.gpio17, pins.gpio18, BAUD)?;

    // ── 3. Session + bring-up ─────────────────────────────────
    let config = ModemConfig::default();
    let mut registry = ModuleRegistry::new();
    registry.register_with(|| {
        ModemSession::open_serial(port, TaskDelay::new(), config)
            .map(|s| Box::new(s) as Box<dyn SocketModule>)
    })?;
    if registry.init() != OK {
        bail!("modem bring-up failed");
    }
    let Some(modem) = registry.module() else {
        bail!("no socket module registered");
    };

    // ── 4. Connectivity check ─────────────────────────────────
    let mut addr = [0u8; 16];
    if modem.parse_domain(CHECK_HOST, &mut addr) == OK {
        let end = addr.iter().position(|&b| b == 0).unwrap_or(addr.len());
        info!(
            "DNS: {} -> {}",
            CHECK_HOST,
            core::str::from_utf8(&addr[..end]).unwrap_or("?")
        );
    } else {
        warn!("DNS: {} did not resolve", CHECK_HOST);
    }

    let id = modem.connect(CHECK_HOST, CHECK_PORT, Protocol::Tcp);
    if id < 0 {
        bail!("connect to {}:{} failed ({})", CHECK_HOST, CHECK_PORT, id);
    }
    let sent = modem.send(id, CHECK_REQUEST);
    info!("SOCK[{}]: sent {} bytes", id, sent);

    let mut reply = [0u8; 512];
    let n = modem.recv_timeout(id, &mut reply, 10_000);
    if n > 0 {
        let head = &reply[..n as usize];
        let line = head.split(|&b| b == b'\n').next().unwrap_or(head);
        info!("SOCK[{}]: {}", id, String::from_utf8_lossy(line).trim_end());
    } else {
        warn!("SOCK[{}]: no reply ({})", id, n);
    }
    modem.close(id);

    // ── 5. Idle ───────────────────────────────────────────────
    info!("Connectivity check done, idling");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
