//! Fuzz target: `urc::dnsgip::frame_domain`
//!
//! Any byte sequence after the `+QIURC: "dnsgip",` prefix must either
//! frame cleanly or fail with a `FrameError`; an address must echo back
//! as a dotted quad that parses again to itself.
//!
//! cargo fuzz run fuzz_dnsgip_frame

#![no_main]

use cellmodem::urc::dnsgip::{DomainFrame, frame_domain};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut src: &[u8] = data;
    if let Ok(DomainFrame::Address(addr)) = frame_domain(&mut src) {
        let text = addr.to_string();
        let quoted = format!("\"{text}\"");
        let mut again: &[u8] = quoted.as_bytes();
        assert_eq!(frame_domain(&mut again), Ok(DomainFrame::Address(addr)));
    }
});
