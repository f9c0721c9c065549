//! Fuzz test for decoding stored event columns
//!
//! Feeds arbitrary bytes to the column decoders `SqliteStorage::events`
//! applies when reading rows back: status strings, site timestamps and
//! binary IP addresses. None of them may
//! panic, and decoded values must survive a trip through their canonical form.
//!
//! Run with: cargo +nightly fuzz run row_decode_fuzz -- -max_total_time=60

#![no_main]

use dlstats_core::{format_site_time, parse_site_time, DownloadStatus, UserIp};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(ip) = UserIp::from_slice(data) {
        // Every accepted blob widens to the fixed 16-byte form.
        assert_eq!(ip.as_bytes().len(), 16);
        assert_eq!(UserIp::from(ip.to_ip_addr()), ip);
    }

    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(status) = DownloadStatus::from_db_str(input) {
            assert_eq!(DownloadStatus::from_db_str(status.as_db_str()), Ok(status));
        }

        if let Some(ts) = parse_site_time(input) {
            let _ = format_site_time(&ts);
        }
    }
});
