//! Fuzz test for event payload construction
//!
//! Arbitrary user agent strings must be bounded to the column width on a
//! character boundary, never split a code point and never panic.
//!
//! Run with: cargo +nightly fuzz run user_agent_fuzz -- -max_total_time=60

#![no_main]

use dlstats_core::{
    DownloadStatus, NewDownloadEvent, ProductId, SiteTime, UserId, USER_AGENT_MAX_LEN,
};
use libfuzzer_sys::fuzz_target;
use std::net::{IpAddr, Ipv4Addr};

fuzz_target!(|data: &[u8]| {
    if let Ok(agent) = std::str::from_utf8(data) {
        let event = NewDownloadEvent::new(
            DownloadStatus::Success,
            SiteTime::default(),
            ProductId(1),
            UserId::ANONYMOUS,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            agent,
        );

        assert!(event.user_agent.len() <= USER_AGENT_MAX_LEN);
        assert!(agent.starts_with(event.user_agent.as_str()));
        if agent.len() <= USER_AGENT_MAX_LEN {
            assert_eq!(event.user_agent, agent);
        }
    }
});
