//! Fuzz target: `urc::recv::frame_incoming`
//!
//! Feeds arbitrary bytes as the tail of a `+QIURC: "recv",` notification
//! into a table with every channel live.  The framer must never panic
//! and must buffer exactly the payload length it reports.
//!
//! cargo fuzz run fuzz_recv_frame

#![no_main]

use cellmodem::channel::{ChannelTable, MAX_CHANNELS, Protocol};
use cellmodem::urc::recv::{MAX_PAYLOAD, frame_incoming};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let table = ChannelTable::new();
    for _ in 0..MAX_CHANNELS {
        let Ok(id) = table.allocate("fuzz", 1, Protocol::Tcp, None) else {
            return;
        };
        let _ = table.mark_established(id);
    }

    let mut src: &[u8] = data;
    if let Ok((id, len)) = frame_incoming(&mut src, &table) {
        assert!(len <= MAX_PAYLOAD, "declared length above bound");
        assert_eq!(table.buffered(id), len, "buffered bytes differ from frame");
        assert!(data.len() - src.len() >= len, "payload read past the consumed bytes");
    }
});
