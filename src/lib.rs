//! Quota Gate - Per-Identity Rate Limiting
//!
//! This crate enforces per-identity request quotas for an HTTP service. Callers are
//! identified by an API token or, failing that, their IP address. Counters and block
//! flags live in a shared counting store so every instance of the service enforces the
//! same quota.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
