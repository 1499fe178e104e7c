//! Crate Constants
//!
//! This module defines constant values used throughout the crate,
//! particularly the limits governing parallel range downloads.

/// Maximum number of simultaneous connections per download.
///
/// Desktop HTTP stacks typically execute at most 6 requests in parallel
/// for one host/port combination, so more connections would only queue.
pub const MAX_SIMULTANEOUS_CONNECTIONS: u32 = 6;

/// Minimum chunk size allowed for parallel downloads, in bytes (10 KB).
///
/// Smaller chunk size limits are rejected at start. Zero is allowed and
/// means no limit.
pub const MIN_CHUNK_SIZE: i64 = 10_240;

/// Minimum content size allowed for parallel downloads, in bytes (100 KB).
///
/// Smaller payloads are fetched over a single connection.
pub const MIN_SIMULTANEOUS_CONTENT_SIZE: i64 = 102_400;

/// User-Agent header value for outgoing requests.
pub const USER_AGENT: &str = "FastDownloader";

/// Capacity of the transport event channel feeding the orchestrator.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;
