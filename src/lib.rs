//! Floodgate - In-Process Request Rate Limiting
//!
//! This crate implements a sliding-window rate limiter for protecting API
//! endpoints. Each identifier (a client address or API key) gets its own
//! request log; exceeding a policy's quota latches the identifier into a
//! blocked state until its oldest counted request leaves the window. A
//! background sweep evicts idle identifiers so memory stays bounded.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;
