//! Sluice - Shared Rate Limit Admission Service
//!
//! This crate gates HTTP endpoints behind rate limiters whose state lives in
//! an external counter store (Redis), so every replica of the service enforces
//! the same logical limit. Two algorithms are provided: a replenishing fixed
//! bucket and a sliding window over per-minute buckets.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
