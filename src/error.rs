//! Unified error types for the modem driver.
//!
//! A single `Error` enum that every subsystem converts into, so the socket
//! surface can map outcomes to integer codes in one place.  All variants
//! are `Copy` so they pass cheaply between the parser task and callers.

use core::fmt;

use crate::bringup::Stage;

// ---------------------------------------------------------------------------
// Top-level driver error
// ---------------------------------------------------------------------------

/// Every fallible driver operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The expected response or marker did not arrive within the budget.
    Timeout,
    /// A response arrived but lacked the expected marker or parse shape.
    Mismatch,
    /// The modem answered `ERROR` / `FAIL`.
    Rejected,
    /// No free channel identifier.
    Exhausted,
    /// A notification could not be framed and was abandoned.
    Desync(FrameError),
    /// A bring-up stage failed; the session is unusable.
    BringUp(Stage, Cause),
    /// Bring-up has not completed successfully.
    NotReady,
    /// The channel is not in the established state.
    NotLive,
    /// Channel identifier out of range or not allocated.
    InvalidChannel,
    /// Formatted command exceeds the command line buffer.
    CommandTooLong,
    /// Payload exceeds what a single send command may carry.
    PayloadTooLarge,
    /// An argument failed validation before any modem I/O.
    InvalidArgument(&'static str),
    /// Configuration is invalid or could not be parsed.
    Config(&'static str),
    /// The serial link or the parser task failed.
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for modem"),
            Self::Mismatch => write!(f, "unexpected modem response"),
            Self::Rejected => write!(f, "modem rejected command"),
            Self::Exhausted => write!(f, "no free channel"),
            Self::Desync(e) => write!(f, "notification abandoned: {e}"),
            Self::BringUp(stage, cause) => write!(f, "{stage} ({cause})"),
            Self::NotReady => write!(f, "modem not initialised"),
            Self::NotLive => write!(f, "channel not established"),
            Self::InvalidChannel => write!(f, "invalid channel"),
            Self::CommandTooLong => write!(f, "command too long"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io => write!(f, "serial I/O error"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Bring-up failure cause
// ---------------------------------------------------------------------------

/// Why a bring-up stage gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// The last attempt timed out.
    Timeout,
    /// The modem answered with an error.
    Rejected,
    /// The response could not be parsed.
    Mismatch,
    /// Every attempt completed but the modem never reported ready.
    Exhausted,
    /// The command could not be built or sent.
    Local,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Rejected => write!(f, "rejected"),
            Self::Mismatch => write!(f, "bad response"),
            Self::Exhausted => write!(f, "retries exhausted"),
            Self::Local => write!(f, "local error"),
        }
    }
}

impl From<Error> for Cause {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout => Self::Timeout,
            Error::Rejected => Self::Rejected,
            Error::Mismatch => Self::Mismatch,
            _ => Self::Local,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification framing errors
// ---------------------------------------------------------------------------

/// A notification handler could not complete its frame.
///
/// None of these are recovered: the handler returns and the remainder of
/// the frame (if any) is left on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The stream closed or a read came up short.
    StreamClosed,
    /// An unexpected byte where a digit or delimiter was required.
    Malformed,
    /// A numeric field exceeded its digit or range bound.
    Overflow,
    /// The channel table refused the payload.
    Rejected,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamClosed => write!(f, "short read"),
            Self::Malformed => write!(f, "malformed field"),
            Self::Overflow => write!(f, "field out of range"),
            Self::Rejected => write!(f, "channel rejected payload"),
        }
    }
}

impl core::error::Error for FrameError {}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Desync(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
