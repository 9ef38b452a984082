//! Turnstile - Per-client Fixed-Window Rate Limiting
//!
//! This crate implements a fixed-window request counter keyed by client
//! identifier (usually the source IP address), together with an axum
//! middleware and a small HTTP service that put it in front of an API.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod tasks;
