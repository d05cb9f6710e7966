#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod distribution;
pub mod gates;
pub mod http;
pub mod public_error;
pub mod telemetry;
pub mod transfer;
