//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text through `AppConfig::parse()` and, when it parses,
//! through endpoint resolution and an environment overlay.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(mut config) = clamrest_config::AppConfig::parse(s) {
            let _ = config.clamd.endpoint().to_string();
            let _ = config.apply_env([("CLAMAV_CLAMD_PORT", s), ("CLAMAV_INCLUDE_RAW_DATA", s)]);
        }
    }
});
