#![deny(unsafe_code)]

//! HTTP/JSON service in front of clamd.
//!
//! ```text
//! ┌──────────┐      HTTP/JSON       ┌──────────────┐   clamd protocol   ┌────────┐
//! │  Client  │─────────────────────▶│    Router    │───────────────────▶│ clamd  │
//! │          │  multipart uploads   │   (axum)     │  spawn_blocking    │        │
//! └──────────┘                      └──────────────┘                    └────────┘
//! ```
//!
//! No authentication is implemented: run the service behind something that
//! is.

pub mod build_info;
pub mod error;
pub mod openapi;
pub mod pages;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use server::{AppState, bind, router, serve};
pub use types::*;
