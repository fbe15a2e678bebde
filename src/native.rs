//! Boundary between the bridge and the native producer engine.
//!
//! The engine owns connections, retries, compression and the broker protocol.
//! The bridge only needs the surface below: enqueue one message or a batch,
//! serve delivery reports through [`EngineCallbacks`], report queue depth and
//! tear down.
//!
//! # Token ownership
//!
//! [`NativeProducer::produce`] takes the [`DeliveryToken`] by value. On success
//! the engine keeps it until it hands it back exactly once through
//! [`EngineCallbacks::on_delivery`]. On rejection it is returned inside
//! [`Rejected`], so the caller releases it. Batch members are enqueued with
//! borrowed correlations only; their handles stay in the batch.
//!
//! # Threading
//!
//! Every method may be called concurrently from several submitting threads.
//! Callbacks fire on engine-owned threads, never while an engine lock that
//! `produce` needs is held.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::batch::MessageSlot;
use crate::config::ProducerConfig;
use crate::error::{KafkaCode, Result};
use crate::handle::DeliveryToken;
use crate::partitioner::Partitioner;
use crate::relay::LogLevel;
use crate::types::{Partition, TopicId};

/// Callbacks the engine invokes from its background threads.
pub trait EngineCallbacks: Send + Sync {
    /// Final outcome of one enqueued message. Called exactly once per accepted
    /// token unless the engine is destroyed first.
    fn on_delivery(&self, code: KafkaCode, partition: Partition, token: DeliveryToken);

    /// Producer-level error not tied to a message.
    fn on_error(&self, code: KafkaCode, reason: &str);

    /// Engine log line.
    fn on_log(&self, level: LogLevel, facility: &str, message: &str);
}

/// Topic registration handed to the engine.
#[derive(Clone)]
pub struct NativeTopic {
    pub id: TopicId,
    pub name: String,
    pub partitioner: Arc<dyn Partitioner>,
}

impl fmt::Debug for NativeTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTopic")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("partitioner", &self.partitioner.kind())
            .finish()
    }
}

/// An enqueue the engine refused. The token comes back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub code: KafkaCode,
    pub token: DeliveryToken,
}

/// The native producer engine.
pub trait NativeProducer: Send + Sync + Sized {
    /// Engine-specific settings beyond the shared [`ProducerConfig`].
    type Config: Send;

    /// Create the engine and register the callback sink.
    fn create(
        settings: &ProducerConfig,
        config: Self::Config,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Result<Self>;

    /// Make a topic known to the engine.
    fn add_topic(&self, topic: NativeTopic) -> Result<()>;

    /// Enqueue one message. Returns immediately.
    ///
    /// With [`Partition::UNASSIGNED`] the topic's partitioner runs
    /// synchronously on the calling thread.
    fn produce(
        &self,
        topic: TopicId,
        partition: Partition,
        key: Bytes,
        payload: Bytes,
        token: DeliveryToken,
    ) -> std::result::Result<(), Rejected>;

    /// Enqueue every stored slot of a batch.
    ///
    /// Slots already carrying an error are skipped. Slots that fail
    /// validation get their error code set before this returns. Accepted slots are reported later through
    /// [`EngineCallbacks::on_delivery`] with a borrowed token. Returns the
    /// number of accepted slots.
    fn produce_batch(&self, topic: TopicId, partition: Partition, slots: &mut [MessageSlot])
    -> usize;

    /// Wait up to `timeout` for delivery reports to be served. Returns the
    /// number of reports served while waiting.
    fn poll(&self, timeout: Duration) -> usize;

    /// Messages enqueued but not yet reported.
    fn outq_len(&self) -> usize;

    /// Stop the engine. Messages still queued are dropped without a report;
    /// returns how many were dropped. Calling it again returns `0`.
    fn destroy(&self) -> usize;
}
