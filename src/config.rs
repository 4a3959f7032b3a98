//! Modem session configuration
//!
//! All tunable parameters for bring-up, channel control and the
//! notification path.  Values can be overridden by a JSON provisioning
//! payload; any field left out keeps its default.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum APN length accepted by `AT+QICSGP`.
pub const APN_CAP: usize = 32;

/// Core modem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    // --- Network ---
    /// Access point name used for context 1
    pub apn: heapless::String<APN_CAP>,

    // --- Bring-up ---
    /// Attempts per retried bring-up stage
    pub stage_retries: u32,
    /// Sleep between polling attempts (milliseconds)
    pub settle_ms: u32,
    /// Liveness probe timeout (milliseconds)
    pub probe_timeout_ms: u32,
    /// Default timeout for short commands (milliseconds)
    pub command_timeout_ms: u32,
    /// APN deactivate/activate timeout (milliseconds)
    pub apn_timeout_ms: u32,

    // --- Channels ---
    /// Wait for `+QIOPEN: <id>,0` (milliseconds)
    pub open_timeout_ms: u32,
    /// Wait for the `>` send prompt (milliseconds)
    pub prompt_timeout_ms: u32,
    /// Wait for `SEND OK` on stream channels (milliseconds)
    pub send_timeout_ms: u32,
    /// Wait for `SEND OK` on datagram channels (milliseconds)
    pub datagram_send_timeout_ms: u32,
    /// Delay after the `+++` escape (milliseconds)
    pub escape_settle_ms: u32,
    /// Default receive timeout (milliseconds)
    pub recv_timeout_ms: u32,

    // --- Resolver ---
    /// Acknowledgement timeout for `AT+QIDNSGIP` (milliseconds)
    pub dns_request_timeout_ms: u32,
    /// Wait for the address notification; `None` blocks forever
    pub resolve_timeout_ms: Option<u32>,

    // --- Notification path ---
    /// Per-byte read budget inside a notification frame (milliseconds)
    pub urc_byte_timeout_ms: u32,
}

impl Default for ModemConfig {
    fn default() -> Self {
        let mut apn = heapless::String::new();
        // "CMNET" always fits in APN_CAP.
        let _ = apn.push_str("CMNET");
        Self {
            apn,

            // Bring-up
            stage_retries: 10,
            settle_ms: 2000,
            probe_timeout_ms: 1000,
            command_timeout_ms: 1000,
            apn_timeout_ms: 3000,

            // Channels
            open_timeout_ms: 4000,
            prompt_timeout_ms: 1000,
            send_timeout_ms: 10_000,
            datagram_send_timeout_ms: 1000,
            escape_settle_ms: 500,
            recv_timeout_ms: 4000,

            // Resolver
            dns_request_timeout_ms: 2000,
            resolve_timeout_ms: Some(30_000),

            // Notification path
            urc_byte_timeout_ms: 2000,
        }
    }
}

impl ModemConfig {
    /// Parse a provisioning payload and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed json"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make bring-up or I/O meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.apn.is_empty() {
            return Err(Error::Config("apn is empty"));
        }
        if self.apn.contains('"') {
            return Err(Error::Config("apn contains a quote"));
        }
        if self.stage_retries == 0 {
            return Err(Error::Config("stage_retries must be non-zero"));
        }
        let timeouts = [
            self.probe_timeout_ms,
            self.command_timeout_ms,
            self.apn_timeout_ms,
            self.open_timeout_ms,
            self.prompt_timeout_ms,
            self.send_timeout_ms,
            self.datagram_send_timeout_ms,
            self.dns_request_timeout_ms,
            self.urc_byte_timeout_ms,
        ];
        if timeouts.contains(&0) {
            return Err(Error::Config("command timeouts must be non-zero"));
        }
        if self.resolve_timeout_ms == Some(0) {
            return Err(Error::Config("resolve_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}
