//! Receive cache for the parser task.
//!
//! Bytes accumulate here until a line terminator, a notification prefix or
//! an expected marker resolves them.  The cache holds at most one line;
//! a line that outgrows it is discarded.

use log::warn;

/// Longest line the parser keeps.
pub const CACHE_CAP: usize = 256;

/// What the byte just pushed completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Nothing yet.
    Pending,
    /// A `\n` closed the current line.
    Line,
    /// The cache now equals registered prefix `n`.
    Prefix(usize),
}

/// Classification of a completed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Ok,
    Fail,
    Other,
}

/// Result lines that end a command unsuccessfully.
const FAIL_LINES: [&str; 3] = ["ERROR", "FAIL", "SEND FAIL"];
const FAIL_PREFIXES: [&str; 2] = ["+CME ERROR", "+CMS ERROR"];

/// Classify a trimmed line.
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() {
        LineKind::Blank
    } else if line == "OK" {
        LineKind::Ok
    } else if FAIL_LINES.contains(&line) || FAIL_PREFIXES.iter().any(|p| line.starts_with(p)) {
        LineKind::Fail
    } else {
        LineKind::Other
    }
}

#[derive(Default)]
pub struct RecvCache {
    buf: heapless::Vec<u8, CACHE_CAP>,
}

impl RecvCache {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
        }
    }

    /// Append one byte and report whether it completed anything.
    pub fn push(&mut self, byte: u8, prefixes: &[&str]) -> CacheEvent {
        if self.buf.push(byte).is_err() {
            warn!("AT: line exceeds {} bytes, discarded", CACHE_CAP);
            self.buf.clear();
            // Capacity is non-zero, so the retry lands.
            let _ = self.buf.push(byte);
        }

        if byte == b'\n' {
            return CacheEvent::Line;
        }
        match prefixes
            .iter()
            .position(|p| p.as_bytes() == self.buf.as_slice())
        {
            Some(i) => CacheEvent::Prefix(i),
            None => CacheEvent::Pending,
        }
    }

    /// Whether `needle` occurs anywhere in the cached bytes.
    pub fn contains(&self, needle: &str) -> bool {
        self.contains_from(needle, 0)
    }

    /// Whether `needle` occurs in the cached bytes at or after `from`.
    pub fn contains_from(&self, needle: &str, from: usize) -> bool {
        let needle = needle.as_bytes();
        let tail = self.buf.get(from..).unwrap_or_default();
        !needle.is_empty() && tail.windows(needle.len()).any(|w| w == needle)
    }

    /// The cached line without surrounding whitespace.  Invalid UTF-8
    /// reads as an empty line.
    pub fn line(&self) -> &str {
        core::str::from_utf8(&self.buf).map_or("", str::trim)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
