//! Canonical default values shared by server and agent.

/// Seconds between job polls when the queue is empty.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Seconds between heartbeats.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Consecutive connection/internal failures before the polling loop gives up.
pub const MAX_POLL_FAILURES: u32 = 5;

/// Minimum milliseconds between progress reports for a job.
pub const MIN_REPORT_INTERVAL_MS: u64 = 500;

/// Result payloads above this size must use the chunked upload endpoints.
pub const INLINE_UPLOAD_LIMIT_BYTES: usize = 1024 * 1024;

/// Test-cache entries expire after this many hours.
pub const TEST_CACHE_TTL_HOURS: i64 = 24;

/// Collection cache expires after this many days.
pub const COLLECTION_CACHE_TTL_DAYS: i64 = 7;

/// Team config cache expires after this many hours.
pub const TEAM_CONFIG_CACHE_TTL_HOURS: i64 = 24;

/// Cached heartbeat version verdict expires after this many seconds.
pub const VERSION_CACHE_TTL_SECS: u64 = 3600;

/// Registration tokens expire after this many hours by default.
pub const REGISTRATION_TOKEN_TTL_HOURS: i64 = 24;

/// Default maximum retries for a job.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Default server bind address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8470";

/// Bulk camera discovery accepts at most this many ids per call.
pub const CAMERA_DISCOVER_LIMIT: usize = 50;
