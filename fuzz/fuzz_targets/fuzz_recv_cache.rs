//! Fuzz target: `at::cache::RecvCache`
//!
//! Pushes arbitrary bytes through the parser's line cache with the real
//! notification prefixes.  The cache must stay within capacity, report a
//! prefix only when it holds exactly that prefix, and classify every
//! completed line without panicking.
//!
//! cargo fuzz run fuzz_recv_cache

#![no_main]

use cellmodem::at::cache::{CACHE_CAP, CacheEvent, RecvCache, classify};
use cellmodem::urc::NOTIFICATIONS;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let prefixes = NOTIFICATIONS.map(|(p, _)| p);
    let mut cache = RecvCache::new();
    for &b in data {
        match cache.push(b, &prefixes) {
            CacheEvent::Pending => {}
            CacheEvent::Line => {
                let _ = classify(cache.line());
                cache.clear();
            }
            CacheEvent::Prefix(i) => {
                assert!(cache.contains(prefixes[i]));
                assert_eq!(cache.len(), prefixes[i].len());
                cache.clear();
            }
        }
        assert!(cache.len() <= CACHE_CAP);
    }
});
