//! MDLA Network Layer
//!
//! Outbound networking that happens outside the proxy tunnel.
//!
//! - HTTP(S) GET for subscription documents (hyper + rustls)
//! - TCP connect latency probing of proxy servers

mod client;
mod latency;

pub use client::{ClientStats, HttpClient, HttpClientConfig, HttpError, Response};
pub use latency::{probe, probe_all};
