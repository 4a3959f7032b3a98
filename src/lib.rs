//! EC600S cellular modem driver library.
//!
//! Exposes the session manager and its building blocks for the firmware
//! binary and for host-side integration tests.  ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module.
//!
//! ```text
//!   caller tasks                         parser task ("at-parser")
//!   ────────────                         ─────────────────────────
//!   sal::SocketModule                    at::agent::Parser
//!        │                                 │  bytes from SerialPort
//!   session::ModemSession                  ├─ status lines ──► completion
//!     ├─ bringup (8-stage FSM)             └─ URC prefixes ──► urc::Dispatcher
//!     ├─ connect / close / send                                   ├─ recv   ─► channel::ChannelTable
//!     ├─ receive ◄──────── channel::ChannelTable ◄────────────────┘
//!     └─ resolve ◄──────── resolver::Rendezvous ◄──── dnsgip ─────┘
//!        │
//!   at::AtPort (one command in flight)
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod at;
pub mod bringup;
pub mod channel;
pub mod config;
pub mod error;
pub mod resolver;
pub mod sal;
pub mod session;
pub mod task;
pub mod urc;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
