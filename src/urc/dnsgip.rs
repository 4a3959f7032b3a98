//! Domain-resolution framer.
//!
//! The modem answers `AT+QIDNSGIP` with a header notification followed by
//! one notification per address:
//!
//! ```text
//! +QIURC: "dnsgip",0,1,600
//! +QIURC: "dnsgip","93.184.216.34"
//! ```
//!
//! Some firmware folds both into `0,1,"93.184.216.34"`; all three forms
//! are accepted.

use super::read_decimal;
use crate::at::ByteSource;
use crate::error::FrameError;
use crate::resolver::ResolvedAddress;

/// Bytes scanned after the status field before giving up on a line.
const LINE_BUDGET: usize = 64;

const CODE_DIGITS: usize = 5;
const SEGMENT_DIGITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainFrame {
    /// One resolved address.
    Address(ResolvedAddress),
    /// Status line without an address; `error` 0 means addresses follow.
    Header { error: u32 },
}

/// Frame one `dnsgip` notification whose prefix has been consumed.
pub fn frame_domain(src: &mut dyn ByteSource) -> Result<DomainFrame, FrameError> {
    let first = src.read_byte().ok_or(FrameError::StreamClosed)?;
    if first == b'"' {
        return read_quad(src).map(DomainFrame::Address);
    }
    if !first.is_ascii_digit() {
        return Err(FrameError::Malformed);
    }

    let mut error = u32::from(first - b'0');
    let mut digits = 1;
    loop {
        match src.read_byte().ok_or(FrameError::StreamClosed)? {
            b @ b'0'..=b'9' => {
                digits += 1;
                if digits > CODE_DIGITS {
                    return Err(FrameError::Overflow);
                }
                error = error * 10 + u32::from(b - b'0');
            }
            b',' => break,
            b'\r' => {
                if src.read_byte().ok_or(FrameError::StreamClosed)? != b'\n' {
                    return Err(FrameError::Malformed);
                }
                return Ok(DomainFrame::Header { error });
            }
            b'\n' => return Ok(DomainFrame::Header { error }),
            _ => return Err(FrameError::Malformed),
        }
    }

    // Remaining header fields: count, ttl, or an inline quoted address.
    for _ in 0..LINE_BUDGET {
        match src.read_byte().ok_or(FrameError::StreamClosed)? {
            b'"' if error == 0 => return read_quad(src).map(DomainFrame::Address),
            b'\n' => return Ok(DomainFrame::Header { error }),
            _ => {}
        }
    }
    Err(FrameError::Overflow)
}

/// Read `a.b.c.d"`.
fn read_quad(src: &mut dyn ByteSource) -> Result<ResolvedAddress, FrameError> {
    let mut segments = [0u8; 4];
    for (i, seg) in segments.iter_mut().enumerate() {
        let terminator = if i == 3 { b'"' } else { b'.' };
        let value = read_decimal(src, terminator, SEGMENT_DIGITS)?;
        *seg = u8::try_from(value).map_err(|_| FrameError::Overflow)?;
    }
    Ok(ResolvedAddress(segments))
}
