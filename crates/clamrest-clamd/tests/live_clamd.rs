//! Tests against a real clamd.
//!
//! Ignored by default. Run with a daemon listening on a Unix socket:
//!
//! ```sh
//! CLAMREST_TEST_SOCKET=/run/clamav/clamd.ctl cargo test -p clamrest-clamd -- --ignored
//! ```

use clamrest_clamd::{ClamdClient, ClientOptions, ScanStatus, Terminator};
use clamrest_test_utils::EICAR;

fn live_client(terminator: Terminator) -> ClamdClient {
    let socket = std::env::var("CLAMREST_TEST_SOCKET")
        .expect("CLAMREST_TEST_SOCKET must point at a running clamd socket");
    let options = ClientOptions::default().with_terminator(terminator);
    ClamdClient::unix(socket, options).unwrap()
}

#[test]
#[ignore = "needs a running clamd"]
fn live_ping_version_stats() {
    let client = live_client(Terminator::Nul);
    assert_eq!(client.ping().unwrap().message, "PONG");
    assert!(client.version().unwrap().message.starts_with("ClamAV "));
    assert!(client.stats().unwrap().message.contains("POOLS:"));
}

#[test]
#[ignore = "needs a running clamd"]
fn live_instream_eicar() {
    for terminator in [Terminator::Nul, Terminator::Newline] {
        let client = live_client(terminator);
        let result = client.scan_stream(EICAR).unwrap();
        assert_eq!(result.status, ScanStatus::Found);
        assert!(result.virus.is_some());

        let clean = client.scan_stream(&b"nothing to see"[..]).unwrap();
        assert_eq!(clean.status, ScanStatus::Ok);
    }
}

#[test]
#[ignore = "needs a running clamd"]
fn live_scan_missing_path() {
    let client = live_client(Terminator::Nul);
    let result = client
        .scan_path("/nonexistent/clamrest/live-test")
        .unwrap();
    assert_eq!(result.status, ScanStatus::Error);
    assert!(result.error_message.is_some());
}
