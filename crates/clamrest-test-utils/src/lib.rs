#![deny(unsafe_code)]

//! Shared test utilities for the clamrest workspace.
//!
//! Provides a fake clamd daemon, config builders, and tracing helpers so
//! that individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! clamrest-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fake_clamd;
pub mod tracing_setup;

pub use fake_clamd::{EICAR, FakeClamd, FakeClamdBuilder, ReceivedRequest, Reply, clamd_like};
