//! Fuzz target for the clamd reply parsers.
//!
//! Run with: cargo +nightly fuzz run fuzz_scan_line
//!
//! The first byte picks the terminator; the rest is treated as a raw reply.

#![no_main]

use clamrest_clamd::{RawResponse, ScanResult, ScanStatus, Terminator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let terminator = if selector & 1 == 0 {
        Terminator::Nul
    } else {
        Terminator::Newline
    };
    let Ok(raw) = String::from_utf8(rest.to_vec()) else {
        return;
    };

    let generic = RawResponse::parse(raw.clone(), terminator);
    assert!(generic.details.iter().all(|d| !d.is_empty()));

    let scan = ScanResult::parse(raw.clone(), terminator);
    assert_eq!(scan.raw_text(), raw);
    match scan.status {
        ScanStatus::Ok => assert!(scan.virus.is_none() && scan.error_message.is_none()),
        ScanStatus::Found => assert!(scan.virus.is_some() && scan.error_message.is_none()),
        ScanStatus::Error => assert!(scan.virus.is_none() && scan.error_message.is_some()),
        ScanStatus::ClientParseError => {
            assert!(scan.input_file.is_none() && scan.error_message.is_some())
        }
    }
});
