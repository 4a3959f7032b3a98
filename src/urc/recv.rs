//! Incoming-data framer.
//!
//! Wire shape after the prefix: `<id>,<len>\r\n<len raw bytes>`.

use super::read_decimal;
use crate::at::ByteSource;
use crate::channel::{ChannelId, ChannelTable};
use crate::error::FrameError;

/// Largest payload the modem pushes in one notification.
pub const MAX_PAYLOAD: usize = 1500;

/// Chunk size for forwarding payload into the channel table.
pub const STAGING: usize = 128;

const ID_DIGITS: usize = 2;
const LEN_DIGITS: usize = 4;

/// Frame one payload notification and forward it to its channel.
///
/// Returns the channel and the payload length.  On error the remainder of
/// the frame is left on the stream.
pub fn frame_incoming(
    src: &mut dyn ByteSource,
    channels: &ChannelTable,
) -> Result<(ChannelId, usize), FrameError> {
    let id = read_decimal(src, b',', ID_DIGITS)? as ChannelId;
    let len = read_decimal(src, b'\r', LEN_DIGITS)? as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::Overflow);
    }
    if src.read_byte().ok_or(FrameError::StreamClosed)? != b'\n' {
        return Err(FrameError::Malformed);
    }

    let mut staging = [0u8; STAGING];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(STAGING);
        if src.read_into(&mut staging[..want]) < want {
            return Err(FrameError::StreamClosed);
        }
        channels
            .write(id, &staging[..want])
            .map_err(|_| FrameError::Rejected)?;
        remaining -= want;
    }
    Ok((id, len))
}
