//! # Kafkaesque Bridge
//! Delivery tracking between a Rust caller and an asynchronous native Kafka producer.
//!
//! A native producer engine transmits messages on its own threads and reports
//! each outcome later, out of order. This crate correlates every report with
//! the request that produced it and releases every per-message allocation
//! exactly once, whether the message succeeded, failed, or was part of a
//! partially failed batch.
//!
//! # Goals
//! - Ownership instead of bookkeeping: a handle is moved into the engine and
//!   dropped by whoever gets it back, so double release cannot be written
//! - No lookup tables: all routing data rides inside the per-message token
//! - Leak detection built in through a process-wide [`allocation_count`](alloc::allocation_count)
//!
//! ## Getting started
//! ```toml
//! kafkaesque-bridge = "0.1"
//! ```
//!
//! ### Producing
//! Implement [`NativeProducer`](native::NativeProducer) over your engine (or
//! use the in-memory [`MockEngine`](mock_engine::MockEngine) with the
//! `test-utilities` feature), then drive it through a [`Producer`](producer::Producer):
//!
//! ```rust
//! use kafkaesque_bridge::prelude::*;
//! use kafkaesque_bridge::mock_engine::{MockConfig, MockEngine};
//!
//! let producer: Producer<MockEngine> = Producer::new(
//!     ProducerConfig::default(),
//!     MockConfig::default(),
//!     delivery_fn(|report| {
//!         if !report.is_success() {
//!             eprintln!("delivery failed: {}", report.code);
//!         }
//!     }),
//! )
//! .unwrap();
//!
//! let topic = producer.add_topic("clicks").unwrap();
//! producer.submit(topic, b"user-1", b"{\"page\":\"/\"}", None).unwrap();
//!
//! let batch = producer
//!     .submit_batch(topic, &[BatchItem::new(b"a", b"1"), BatchItem::new(b"b", b"2")])
//!     .unwrap();
//! assert_eq!(producer.scan_errors(&batch).count(), 0);
//! drop(batch);
//!
//! producer.close().unwrap();
//! ```
//!
//! ## Modules
//! - [`alloc`]: allocation counter and tracked buffers
//! - [`handle`]: per-message opaque handles and delivery tokens
//! - [`bridge`]: delivery callback bridge and handlers
//! - [`batch`]: batch builder and result scanner
//! - [`partitioner`]: round-robin, random and murmur2 partition selection
//! - [`relay`]: producer-level error and log relay
//! - [`native`]: the engine boundary
//! - [`producer`]: caller-facing producer
//!
//! ## Resources
//! - [Kafka Protocol Guide](https://kafka.apache.org/protocol.html)
//! - [librdkafka](https://github.com/confluentinc/librdkafka)

#![forbid(unsafe_code)]

pub mod alloc;
pub mod batch;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod handle;
pub mod native;
pub mod partitioner;
pub mod producer;
pub mod relay;
mod sync;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utilities"))]
pub mod mock_engine;

pub mod prelude {
    //! Main exports for producing through the bridge.
    pub use crate::alloc::allocation_count;
    pub use crate::batch::{Batch, BatchError};
    pub use crate::bridge::{
        ChannelHandler, DeliveryHandler, DeliveryOutcome, DeliveryReport, NoopHandler, TopicStats,
        delivery_fn,
    };
    pub use crate::config::{PartitionerKind, ProducerConfig, TopicConfig};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::handle::Correlation;
    pub use crate::native::{EngineCallbacks, NativeProducer};
    pub use crate::producer::{BatchItem, Poller, Producer, last_error};
    pub use crate::relay::{EventHandler, LogLevel, TracingRelay};
    pub use crate::types::{BatchId, Partition, TopicId};

    pub use bytes;
}
