//! Crate & native error codes.
//!
//! This module provides the error types shared by every layer of the bridge.
//!
//! # Error Hierarchy
//!
//! - [`Error`]: failures returned synchronously to the caller (submission-time
//!   errors, precondition violations, flush/close problems).
//! - [`KafkaCode`]: per-message and producer-level codes reported by the native
//!   engine. Positive values are broker wire codes, negative values are the
//!   native client's local codes, `0` is success.
//!
//! Delivery errors never surface as [`Error`]; they reach the caller through
//! the delivery handler carrying a [`KafkaCode`].

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::result;
use thiserror::Error as ThisError;

use crate::types::TopicId;

pub type Result<T> = result::Result<T, Error>;

/// Errors returned synchronously by the bridge.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A batch was requested with a non-positive length.
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(i32),

    /// A batch slot outside `[0, len)` was addressed.
    #[error("Batch index {index} out of range (len: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The batch has already been destroyed.
    #[error("Batch already destroyed")]
    BatchDestroyed,

    /// A tracked allocation could not be satisfied.
    #[error("Allocation of {0} bytes failed")]
    AllocationFailed(usize),

    /// Zero-byte messages are discarded before they reach the engine.
    #[error("Empty payload")]
    EmptyPayload,

    /// The topic id was never registered with this producer.
    #[error("Unknown topic: {0}")]
    UnknownTopic(TopicId),

    /// The native engine refused to enqueue the message.
    #[error("Submission rejected: {} ({:?})", .0.reason(), .0)]
    Rejected(KafkaCode),

    /// Flush gave up with messages still in the outbound queue.
    #[error("Flush timed out with {remaining} messages still queued")]
    FlushTimeout { remaining: usize },

    /// The producer has been closed.
    #[error("Producer closed")]
    Closed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine failed outside of any single message.
    #[error("Engine error: {0}")]
    Engine(String),
}

impl Error {
    /// The native code behind this error, if it has one.
    pub fn kafka_code(&self) -> Option<KafkaCode> {
        match self {
            Error::Rejected(code) => Some(*code),
            Error::UnknownTopic(_) => Some(KafkaCode::UnknownTopic),
            Error::EmptyPayload | Error::InvalidBatchSize(_) | Error::IndexOutOfRange { .. } => {
                Some(KafkaCode::InvalidArg)
            }
            Error::Closed => Some(KafkaCode::Destroy),
            _ => None,
        }
    }
}

/// Error codes reported by the native engine or a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, Default)]
pub enum KafkaCode {
    /// Local: received message is incorrect
    BadMessage = -199,
    /// Local: broker handle destroyed, message purged
    Destroy = -197,
    /// Local: generic failure
    Fail = -196,
    /// Local: broker transport failure
    Transport = -195,
    /// Local: message timed out before it could be delivered
    MessageTimedOut = -192,
    /// Local: the partition is not known to the client
    UnknownPartition = -190,
    /// Local: the topic is not known to the client
    UnknownTopic = -188,
    /// Local: all broker connections are down
    AllBrokersDown = -187,
    /// Local: invalid argument or configuration
    InvalidArg = -186,
    /// Local: operation timed out
    TimedOut = -185,
    /// Local: outbound queue is full
    QueueFull = -184,
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// There is currently no leader for this partition and hence it is
    /// unavailable for writes.
    LeaderNotAvailable = 5,
    /// The client attempted to send messages to a replica that is not the
    /// leader for some partition.
    NotLeaderForPartition = 6,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// The broker is not alive.
    BrokerNotAvailable = 8,
    /// The client attempted to produce a message larger than the
    /// configured maximum.
    MessageSizeTooLarge = 10,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// An attempt was made to write to an invalid or internal topic.
    InvalidTopic = 17,
    /// A message batch exceeds the maximum configured segment size.
    RecordListTooLarge = 18,
    /// The number of in-sync replicas is lower than the configured minimum.
    NotEnoughReplicas = 19,
    /// The message was written with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// The requested requiredAcks is invalid (anything other than -1, 1, or 0).
    InvalidRequiredAcks = 21,
    /// The client is not authorized to access the requested topic.
    TopicAuthorizationFailed = 29,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The producer attempted to use a sequence number outside the valid range.
    OutOfOrderSequenceNumber = 45,
    /// The producer attempted to assign a sequence number that was already used.
    DuplicateSequenceNumber = 46,
    /// SASL Authentication failed.
    SaslAuthenticationFailed = 58,
}

impl KafkaCode {
    /// Map a raw native code, folding anything unmapped into `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        KafkaCode::from_i32(raw).unwrap_or(KafkaCode::Unknown)
    }

    /// The raw native value.
    #[inline]
    pub const fn raw(self) -> i32 {
        self as i32
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, KafkaCode::None)
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        !self.is_ok()
    }

    /// Local codes originate in the client, not on a broker.
    #[inline]
    pub const fn is_local(self) -> bool {
        (self as i32) < -1
    }

    /// Human-readable reason, used when forwarding failures.
    pub fn reason(self) -> &'static str {
        match self {
            KafkaCode::BadMessage => "Local: Bad message format",
            KafkaCode::Destroy => "Local: Broker handle destroyed",
            KafkaCode::Fail => "Local: Communication failure with broker",
            KafkaCode::Transport => "Local: Broker transport failure",
            KafkaCode::MessageTimedOut => "Local: Message timed out",
            KafkaCode::UnknownPartition => "Local: Unknown partition",
            KafkaCode::UnknownTopic => "Local: Unknown topic",
            KafkaCode::AllBrokersDown => "Local: All broker connections are down",
            KafkaCode::InvalidArg => "Local: Invalid argument or configuration",
            KafkaCode::TimedOut => "Local: Timed out",
            KafkaCode::QueueFull => "Local: Queue full",
            KafkaCode::Unknown => "Unknown broker error",
            KafkaCode::None => "Success",
            KafkaCode::CorruptMessage => "Broker: Corrupt message",
            KafkaCode::UnknownTopicOrPartition => "Broker: Unknown topic or partition",
            KafkaCode::InvalidMessageSize => "Broker: Invalid message size",
            KafkaCode::LeaderNotAvailable => "Broker: Leader not available",
            KafkaCode::NotLeaderForPartition => "Broker: Not leader for partition",
            KafkaCode::RequestTimedOut => "Broker: Request timed out",
            KafkaCode::BrokerNotAvailable => "Broker: Broker not available",
            KafkaCode::MessageSizeTooLarge => "Broker: Message size too large",
            KafkaCode::NetworkException => "Broker: Disconnected before response",
            KafkaCode::InvalidTopic => "Broker: Invalid topic",
            KafkaCode::RecordListTooLarge => "Broker: Message batch larger than segment size",
            KafkaCode::NotEnoughReplicas => "Broker: Not enough in-sync replicas",
            KafkaCode::NotEnoughReplicasAfterAppend => {
                "Broker: Message(s) written to insufficient number of in-sync replicas"
            }
            KafkaCode::InvalidRequiredAcks => "Broker: Invalid required acks value",
            KafkaCode::TopicAuthorizationFailed => "Broker: Topic authorization failed",
            KafkaCode::InvalidTimestamp => "Broker: Invalid timestamp",
            KafkaCode::OutOfOrderSequenceNumber => "Broker: Out of order sequence number",
            KafkaCode::DuplicateSequenceNumber => "Broker: Duplicate sequence number",
            KafkaCode::SaslAuthenticationFailed => "Broker: SASL authentication failed",
        }
    }
}

impl std::fmt::Display for KafkaCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.raw())
    }
}
