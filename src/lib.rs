//! Tokenhive - Distributed Token Bucket Rate Limiting
//!
//! This crate implements a token bucket rate limiter whose state lives in a
//! shared store, so that any number of processes draw from one quota. When
//! the store becomes unreachable each process falls back to a local bucket
//! and switches back on its own once the store answers again.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
