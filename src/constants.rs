//! Centralized configuration defaults and native-boundary constants.
//!
//! # Categories
//!
//! - **Producer Defaults**: values used when neither code nor environment
//!   override a [`ProducerConfig`](crate::config::ProducerConfig) field
//! - **Flush/Poll Constants**: pacing of the poll loops that drain delivery reports
//! - **Mock Engine Constants**: defaults of the in-memory engine used in tests

// =============================================================================
// Producer Defaults
// =============================================================================

/// Default `client.id` reported to brokers.
pub const DEFAULT_CLIENT_ID: &str = "kafkaesque-bridge";

/// Default bootstrap server list.
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Maximum number of messages allowed in the native outbound queue
/// (`queue.buffering.max.messages`).
pub const DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES: usize = 100_000;

/// Maximum accepted message size in bytes (`message.max.bytes`, 1 MiB).
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 1 << 20;

/// Interval between background polls of the engine.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound for [`Producer::flush`](crate::producer::Producer::flush) during close.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 10_000;

/// How long a submission blocked by a full queue polls before giving up.
pub const DEFAULT_QUEUE_FULL_POLL_TIMEOUT_MS: u64 = 1_000;

// =============================================================================
// Flush/Poll Constants
// =============================================================================

/// Single poll slice used by the flush loop.
///
/// Progress is checked after every slice; flush stops early only once a
/// whole poll interval has passed without the outbound queue shrinking.
pub const FLUSH_POLL_SLICE_MS: u64 = 100;

/// Upper bound for a single blocking poll, so "poll forever" still
/// re-checks shutdown periodically.
pub const MAX_POLL_SLICE_MS: u64 = 1_000;

// =============================================================================
// Mock Engine Constants
// =============================================================================

/// Partition count for topics the mock engine has no explicit layout for.
pub const DEFAULT_MOCK_PARTITIONS: i32 = 4;
