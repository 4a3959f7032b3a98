//! Command/response primitive.
//!
//! Everything above the AT layer talks to the modem through [`AtPort`], so
//! bring-up, channel control and the data plane are generic over it and can
//! be driven by a scripted port in tests.

use core::fmt::{self, Write as _};
use core::time::Duration;

use crate::error::{Error, Result};

/// Capacity of one formatted command line, including `\r\n`.
pub const CMD_CAP: usize = 256;

/// Capacity of the body captured between a command and its final result.
pub const BODY_CAP: usize = 256;

/// Escape from interactive send mode; written without a line terminator.
pub const ESCAPE: &str = "+++";

pub type Command = heapless::String<CMD_CAP>;
pub type Body = heapless::String<BODY_CAP>;

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoStatus {
    /// Final result line `OK`.
    Ok,
    /// The expected marker appeared in the stream.
    Expect,
    /// `ERROR`, `+CME ERROR`, `FAIL` and friends.
    Fail,
    /// Nothing conclusive before the deadline.
    Timeout,
}

impl EchoStatus {
    /// Succeed only if the expected marker was seen.
    pub fn expect_marker(self) -> Result<()> {
        match self {
            Self::Expect => Ok(()),
            Self::Ok => Err(Error::Mismatch),
            Self::Fail => Err(Error::Rejected),
            Self::Timeout => Err(Error::Timeout),
        }
    }

    /// Succeed on a positive acknowledgement.
    pub fn acknowledged(self) -> Result<()> {
        match self {
            Self::Ok | Self::Expect => Ok(()),
            Self::Fail => Err(Error::Rejected),
            Self::Timeout => Err(Error::Timeout),
        }
    }
}

/// Outcome of [`AtPort::exec`]: final status plus the intermediate lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub status: EchoStatus,
    /// Non-final lines, each terminated by `\n`.
    pub body: Body,
}

impl Echo {
    pub fn new(status: EchoStatus) -> Self {
        Self {
            status,
            body: Body::new(),
        }
    }

    /// The captured body if the command was acknowledged.
    pub fn into_ok(self) -> Result<Body> {
        self.status.acknowledged().map(|()| self.body)
    }
}

/// Synchronous command execution against the modem.
///
/// Implementations serialise callers so at most one command is in flight.
/// Command text is written verbatim; callers append `\r\n` themselves
/// (see [`command`]) so raw sequences such as [`ESCAPE`] go out untouched.
pub trait AtPort {
    /// Write `cmd` and wait for `OK` or an error line.
    fn exec(&self, timeout: Duration, cmd: &str) -> Echo;

    /// Write `cmd` and wait until `expect` appears anywhere in the stream.
    /// A bare `OK` does not complete the wait.
    fn exec_until(&self, timeout: Duration, cmd: &str, expect: &str) -> EchoStatus;

    /// Write raw payload bytes and wait until `expect` appears.
    fn raw_send_until(&self, timeout: Duration, data: &[u8], expect: &str) -> EchoStatus;
}

impl<T: AtPort + ?Sized> AtPort for &T {
    fn exec(&self, timeout: Duration, cmd: &str) -> Echo {
        (**self).exec(timeout, cmd)
    }

    fn exec_until(&self, timeout: Duration, cmd: &str, expect: &str) -> EchoStatus {
        (**self).exec_until(timeout, cmd, expect)
    }

    fn raw_send_until(&self, timeout: Duration, data: &[u8], expect: &str) -> EchoStatus {
        (**self).raw_send_until(timeout, data, expect)
    }
}

/// Format a command line and terminate it with `\r\n`.
pub fn command(args: fmt::Arguments<'_>) -> Result<Command> {
    let mut cmd = Command::new();
    cmd.write_fmt(args).map_err(|_| Error::CommandTooLong)?;
    cmd.push_str("\r\n").map_err(|()| Error::CommandTooLong)?;
    Ok(cmd)
}

/// Milliseconds to a `Duration`.
pub(crate) const fn ms(millis: u32) -> Duration {
    Duration::from_millis(millis as u64)
}
