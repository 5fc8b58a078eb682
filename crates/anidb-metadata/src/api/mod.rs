//! AniDB HTTP API client implementation.
//!
//! This module provides a rate-limited client for the AniDB HTTP API and the
//! title dump, behind a pluggable HTTP transport.

pub mod client;
pub mod rate_limiter;

pub use client::{AniDbClient, HttpResponse, HttpTransport, ReqwestTransport};
pub use rate_limiter::RateLimiter;
