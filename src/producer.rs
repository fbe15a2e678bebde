//! Caller-facing producer.
//!
//! [`Producer`] owns the engine and the [`DeliveryBridge`] it reports to. It
//! creates a handle for every submission, hands it to the engine and makes
//! sure a rejected handle is released on the spot.
//!
//! # Single messages
//!
//! ```rust
//! use kafkaesque_bridge::prelude::*;
//! use kafkaesque_bridge::mock_engine::{MockConfig, MockEngine};
//!
//! let producer: Producer<MockEngine> = Producer::new(
//!     ProducerConfig::default(),
//!     MockConfig::default(),
//!     delivery_fn(|report| println!("{} -> {}", report.topic(), report.code)),
//! )
//! .unwrap();
//!
//! let topic = producer.add_topic("events").unwrap();
//! producer.submit(topic, b"key", b"payload", Some(b"request-17")).unwrap();
//! producer.close().unwrap();
//! assert_eq!(producer.topic_stats(topic).delivered, 1);
//! ```
//!
//! # Batches
//!
//! [`Producer::submit_batch`] returns the [`Batch`] with validation failures
//! already recorded per slot; scan it, then drop it to release its handles.
//!
//! # Shutdown
//!
//! [`Producer::close`] flushes and then destroys the engine. Messages still
//! queued when the flush gives up are dropped without a delivery report;
//! their handles are released all the same.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::alloc;
use crate::batch::{Batch, ErrorScan};
use crate::bridge::{DeliveryBridge, DeliveryHandler, TopicStats};
use crate::config::{ProducerConfig, TopicConfig};
use crate::constants::{FLUSH_POLL_SLICE_MS, MAX_POLL_SLICE_MS};
use crate::error::{Error, KafkaCode, Result};
use crate::handle::{DeliveryToken, OpaqueHandle};
use crate::native::{NativeProducer, NativeTopic, Rejected};
use crate::relay::{EventHandler, TracingRelay};
use crate::types::{Partition, TopicId};

thread_local! {
    static LAST_ERROR: Cell<KafkaCode> = const { Cell::new(KafkaCode::None) };
}

/// Code of the last submission made on this thread; `None` if it succeeded.
pub fn last_error() -> KafkaCode {
    LAST_ERROR.with(Cell::get)
}

fn set_last_error(code: KafkaCode) {
    LAST_ERROR.with(|last| last.set(code));
}

/// Record the outcome of a submission for [`last_error`].
fn record<T>(result: Result<T>) -> Result<T> {
    set_last_error(match &result {
        Ok(_) => KafkaCode::None,
        Err(e) => e.kafka_code().unwrap_or(KafkaCode::Fail),
    });
    result
}

/// One message of a batch submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchItem<'a> {
    pub key: &'a [u8],
    pub payload: &'a [u8],
    pub userdata: Option<&'a [u8]>,
}

impl<'a> BatchItem<'a> {
    pub fn new(key: &'a [u8], payload: &'a [u8]) -> Self {
        Self {
            key,
            payload,
            userdata: None,
        }
    }

    pub fn with_userdata(mut self, userdata: &'a [u8]) -> Self {
        self.userdata = Some(userdata);
        self
    }
}

#[derive(Default)]
struct TopicRegistry {
    by_name: HashMap<String, TopicId>,
    names: Vec<String>,
}

/// Kafka producer front end over a native engine `E`.
pub struct Producer<E: NativeProducer> {
    config: ProducerConfig,
    engine: E,
    bridge: Arc<DeliveryBridge>,
    topics: RwLock<TopicRegistry>,
    closed: AtomicBool,
}

impl<E: NativeProducer> Producer<E> {
    /// Create a producer whose engine events are logged through `tracing`.
    pub fn new<H>(config: ProducerConfig, engine_config: E::Config, handler: H) -> Result<Self>
    where
        H: DeliveryHandler + 'static,
    {
        Self::with_events(
            config,
            engine_config,
            Arc::new(handler),
            Arc::new(TracingRelay),
        )
    }

    /// Create a producer with explicit delivery and event handlers.
    pub fn with_events(
        config: ProducerConfig,
        engine_config: E::Config,
        handler: Arc<dyn DeliveryHandler>,
        events: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let bridge = Arc::new(DeliveryBridge::new(handler, events));
        let engine = E::create(&config, engine_config, bridge.clone())?;

        info!(
            client_id = %config.client_id,
            bootstrap_servers = ?config.bootstrap_servers,
            "Producer created"
        );

        Ok(Self {
            config,
            engine,
            bridge,
            topics: RwLock::new(TopicRegistry::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Register a topic with the configured default partitioner.
    pub fn add_topic(&self, name: &str) -> Result<TopicId> {
        self.add_topic_with(
            name,
            TopicConfig::with_partitioner(self.config.default_partitioner),
        )
    }

    /// Register a topic. An already registered name returns its existing id.
    pub fn add_topic_with(&self, name: &str, config: TopicConfig) -> Result<TopicId> {
        self.ensure_open()?;
        let mut topics = self
            .topics
            .write()
            .map_err(|_| Error::Engine("topic registry poisoned".to_string()))?;
        if let Some(id) = topics.by_name.get(name) {
            return Ok(*id);
        }

        let id = TopicId::new(topics.names.len() as u32);
        self.engine.add_topic(NativeTopic {
            id,
            name: name.to_string(),
            partitioner: config.partitioner.build(),
        })?;
        topics.by_name.insert(name.to_string(), id);
        topics.names.push(name.to_string());

        debug!(topic = name, id = %id, partitioner = %config.partitioner, "Topic registered");
        Ok(id)
    }

    pub fn topic_id(&self, name: &str) -> Option<TopicId> {
        self.topics.read().ok()?.by_name.get(name).copied()
    }

    pub fn topic_name(&self, id: TopicId) -> Option<String> {
        self.topics.read().ok()?.names.get(id.as_index()).cloned()
    }

    /// Submit one message; its partition is chosen by the topic's partitioner.
    ///
    /// Returns once the engine accepted or rejected the message. The outcome
    /// of an accepted message reaches the delivery handler later, with
    /// `userdata` attached.
    pub fn submit(
        &self,
        topic: TopicId,
        key: &[u8],
        payload: &[u8],
        userdata: Option<&[u8]>,
    ) -> Result<()> {
        self.submit_to(topic, Partition::UNASSIGNED, key, payload, userdata)
    }

    /// Submit one message to an explicit partition.
    pub fn submit_to(
        &self,
        topic: TopicId,
        partition: Partition,
        key: &[u8],
        payload: &[u8],
        userdata: Option<&[u8]>,
    ) -> Result<()> {
        record(self.enqueue(topic, partition, key, payload, userdata))
    }

    fn enqueue(
        &self,
        topic: TopicId,
        partition: Partition,
        key: &[u8],
        payload: &[u8],
        userdata: Option<&[u8]>,
    ) -> Result<()> {
        self.ensure_open()?;
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        self.ensure_topic(topic)?;

        let handle = OpaqueHandle::new(topic, 0, None, userdata)?;
        let produced = self.engine.produce(
            topic,
            partition,
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(payload),
            DeliveryToken::Owned(handle),
        );

        match produced {
            Ok(()) => Ok(()),
            Err(Rejected { code, token }) => {
                drop(token);
                if code == KafkaCode::QueueFull {
                    self.relieve_queue();
                }
                Err(Error::Rejected(code))
            }
        }
    }

    /// Submit `items` as one batch.
    ///
    /// Slot `i` carries `items[i]`. Validation failures are recorded in the
    /// returned batch; [`last_error`] holds the first of them.
    pub fn submit_batch(&self, topic: TopicId, items: &[BatchItem<'_>]) -> Result<Batch> {
        let batch = record(self.build_batch(topic, items))?;
        if let Some(index) = batch.next_error(0) {
            let code = batch.error_at(index)?;
            set_last_error(code);
            if batch.errors().any(|e| e.code == KafkaCode::QueueFull) {
                self.relieve_queue();
            }
        }
        Ok(batch)
    }

    fn build_batch(&self, topic: TopicId, items: &[BatchItem<'_>]) -> Result<Batch> {
        self.ensure_open()?;
        self.ensure_topic(topic)?;

        let size = i32::try_from(items.len()).map_err(|_| Error::InvalidBatchSize(i32::MAX))?;
        let mut batch = Batch::new(topic, size)?;
        for (index, item) in items.iter().enumerate() {
            batch.store_item(index, item.key, item.payload, item.userdata)?;
        }

        let accepted = self
            .engine
            .produce_batch(topic, Partition::UNASSIGNED, batch.slots_mut());
        debug!(
            topic = %topic,
            batch = %batch.id(),
            size = batch.len(),
            accepted,
            "Batch submitted"
        );
        Ok(batch)
    }

    /// Failed slots of `batch`, in ascending index order.
    pub fn scan_errors<'a>(&self, batch: &'a Batch) -> ErrorScan<'a> {
        batch.errors()
    }

    /// Live tracked allocations, process-wide.
    pub fn allocation_count(&self) -> i64 {
        alloc::allocation_count()
    }

    /// Code of the last submission made on the calling thread.
    pub fn last_error(&self) -> KafkaCode {
        last_error()
    }

    /// Serve delivery reports for up to `timeout`.
    pub fn poll(&self, timeout: Duration) -> usize {
        self.engine.poll(timeout)
    }

    /// Messages accepted but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.engine.outq_len()
    }

    /// Poll until the outbound queue is empty.
    ///
    /// Gives up at the deadline, or once a full `poll_interval` passes without
    /// the queue shrinking.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let slice = Duration::from_millis(FLUSH_POLL_SLICE_MS);
        let stall_after = self.config.poll_interval.max(slice);
        let mut queued = self.engine.outq_len();
        let mut progressed_at = Instant::now();

        while queued > 0 {
            let now = Instant::now();
            if now >= deadline || now.duration_since(progressed_at) >= stall_after {
                break;
            }
            self.engine.poll((deadline - now).min(slice));
            let remaining = self.engine.outq_len();
            if remaining < queued {
                progressed_at = Instant::now();
            }
            queued = remaining;
        }

        if queued > 0 {
            warn!(
                remaining = queued,
                "Outbound queue could not be flushed; messages will be lost on close"
            );
            return Err(Error::FlushTimeout { remaining: queued });
        }
        Ok(())
    }

    /// Flush, then destroy the engine. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.flush(self.config.flush_timeout);
        let dropped = self.engine.destroy();
        if dropped > 0 {
            warn!(
                dropped,
                "Messages dropped without delivery report at engine destroy"
            );
        }
        info!(
            client_id = %self.config.client_id,
            reports = self.bridge.reports(),
            "Producer closed"
        );
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn topic_stats(&self, topic: TopicId) -> TopicStats {
        self.bridge.topic_stats(topic)
    }

    pub fn bridge(&self) -> &DeliveryBridge {
        &self.bridge
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Start polling the engine every `poll_interval` on a background thread.
    ///
    /// The thread exits when the returned [`Poller`] is stopped or dropped,
    /// or once the producer is gone.
    pub fn spawn_poller(self: &Arc<Self>) -> Result<Poller>
    where
        E: 'static,
    {
        let producer = Arc::downgrade(self);
        let interval = self.config.poll_interval;
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("producer-poller".to_string())
            .spawn(move || run_poller(producer, interval, stopped))
            .map_err(|e| Error::Engine(format!("failed to spawn poller: {}", e)))?;

        Ok(Poller {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Give the engine a chance to drain after a queue-full rejection.
    fn relieve_queue(&self) {
        let served = self.engine.poll(self.config.queue_full_poll_timeout);
        warn!(
            served,
            in_flight = self.engine.outq_len(),
            "Outbound queue full"
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn ensure_topic(&self, topic: TopicId) -> Result<()> {
        let known = self
            .topics
            .read()
            .map(|topics| topic.as_index() < topics.names.len())
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(Error::UnknownTopic(topic))
        }
    }
}

impl<E: NativeProducer> Drop for Producer<E> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Producer closed with errors");
        }
    }
}

impl<E: NativeProducer> fmt::Debug for Producer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("client_id", &self.config.client_id)
            .field("in_flight", &self.engine.outq_len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_poller<E: NativeProducer>(
    producer: Weak<Producer<E>>,
    interval: Duration,
    stopped: crossbeam_channel::Receiver<()>,
) {
    let slice = Duration::from_millis(MAX_POLL_SLICE_MS);
    loop {
        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        let Some(producer) = producer.upgrade() else {
            break;
        };
        if producer.is_closed() {
            break;
        }
        producer.poll(interval.min(slice));
    }
    debug!("Poller stopped");
}

/// Handle to a background poll thread.
pub struct Poller {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Whether the poll thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::bridge::{NoopHandler, delivery_fn};
    use crate::mock_engine::{MockConfig, MockEngine};
    use serial_test::serial;

    fn producer(config: MockConfig) -> Producer<MockEngine> {
        Producer::new(ProducerConfig::default(), config, NoopHandler).unwrap()
    }

    #[test]
    #[serial]
    fn test_topic_registry_dedups() {
        let producer = producer(MockConfig::manual());
        let a = producer.add_topic("a").unwrap();
        let b = producer.add_topic("b").unwrap();
        assert_eq!(a, TopicId(0));
        assert_eq!(b, TopicId(1));
        assert_eq!(producer.add_topic("a").unwrap(), a);
        assert_eq!(producer.topic_id("b"), Some(b));
        assert_eq!(producer.topic_name(a).as_deref(), Some("a"));
        assert_eq!(producer.topic_id("missing"), None);
    }

    #[test]
    #[serial]
    fn test_empty_payload_is_rejected_before_allocation() {
        let producer = producer(MockConfig::manual());
        let topic = producer.add_topic("t").unwrap();
        let before = producer.allocation_count();
        assert_eq!(
            producer.submit(topic, b"k", b"", Some(b"ud")).unwrap_err(),
            Error::EmptyPayload
        );
        assert_eq!(producer.allocation_count(), before);
        assert_eq!(producer.last_error(), KafkaCode::InvalidArg);
    }

    #[test]
    #[serial]
    fn test_last_error_tracks_latest_submission() {
        let producer = producer(MockConfig::manual());
        let topic = producer.add_topic("t").unwrap();

        let err = producer.submit(TopicId(7), b"", b"x", None).unwrap_err();
        assert_eq!(err, Error::UnknownTopic(TopicId(7)));
        assert_eq!(last_error(), KafkaCode::UnknownTopic);

        producer.submit(topic, b"", b"x", None).unwrap();
        assert_eq!(last_error(), KafkaCode::None);

        let err = producer
            .submit_to(topic, Partition(40), b"", b"x", None)
            .unwrap_err();
        assert_eq!(err, Error::Rejected(KafkaCode::UnknownPartition));
        assert_eq!(last_error(), KafkaCode::UnknownPartition);
    }

    #[test]
    #[serial]
    fn test_last_error_is_thread_local() {
        let producer = producer(MockConfig::manual());
        let _ = producer.submit(TopicId(3), b"", b"x", None);
        assert_eq!(last_error(), KafkaCode::UnknownTopic);
        let other = thread::spawn(last_error).join().unwrap();
        assert_eq!(other, KafkaCode::None);
    }

    #[test]
    #[serial]
    fn test_closed_producer_rejects_submissions() {
        let producer = producer(MockConfig::default());
        let topic = producer.add_topic("t").unwrap();
        producer.close().unwrap();
        assert!(producer.is_closed());
        assert_eq!(
            producer.submit(topic, b"", b"x", None).unwrap_err(),
            Error::Closed
        );
        assert_eq!(producer.add_topic("u").unwrap_err(), Error::Closed);
        assert!(producer.close().is_ok());
    }

    #[test]
    #[serial]
    fn test_flush_stalls_on_held_messages() {
        let config = ProducerConfig {
            poll_interval: Duration::from_millis(300),
            ..Default::default()
        };
        let producer: Producer<MockEngine> =
            Producer::new(config, MockConfig::manual(), NoopHandler).unwrap();
        let topic = producer.add_topic("t").unwrap();
        producer.submit(topic, b"", b"x", None).unwrap();
        producer.submit(topic, b"", b"y", None).unwrap();

        let started = Instant::now();
        assert_eq!(
            producer.flush(Duration::from_secs(5)).unwrap_err(),
            Error::FlushTimeout { remaining: 2 }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_close_waits_for_slow_delivery_reports() {
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = delivery_fn(move |report| {
            assert!(report.is_success());
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let engine = MockConfig::default().with_delivery_delay(Duration::from_millis(150));
        let producer: Producer<MockEngine> =
            Producer::new(ProducerConfig::default(), engine, handler).unwrap();
        let topic = producer.add_topic("t").unwrap();
        for i in 0..3u8 {
            producer.submit(topic, &[i], b"payload", None).unwrap();
        }

        assert_eq!(producer.close(), Ok(()));
        assert_eq!(seen.load(Ordering::Relaxed), 3);
        assert_eq!(producer.engine().dropped(), 0);
        assert_eq!(producer.in_flight(), 0);
    }

    #[test]
    #[serial]
    fn test_flush_drains_immediate_engine() {
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = delivery_fn(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let producer: Producer<MockEngine> =
            Producer::new(ProducerConfig::default(), MockConfig::default(), handler).unwrap();
        let topic = producer.add_topic("t").unwrap();
        for i in 0..50u8 {
            producer.submit(topic, &[i], b"payload", None).unwrap();
        }
        producer.flush(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 50);
        assert_eq!(producer.in_flight(), 0);
    }

    #[test]
    #[serial]
    fn test_invalid_config_is_refused() {
        let config = ProducerConfig {
            queue_buffering_max_messages: 0,
            ..Default::default()
        };
        let result: Result<Producer<MockEngine>> =
            Producer::new(config, MockConfig::default(), NoopHandler);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    fn polling_producer() -> Arc<Producer<MockEngine>> {
        let config = ProducerConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        Arc::new(Producer::new(config, MockConfig::default(), NoopHandler).unwrap())
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    #[serial]
    fn test_poller_drives_engine_and_stops() {
        let producer = polling_producer();
        let poller = producer.spawn_poller().unwrap();
        assert!(wait_until(|| producer.engine().poll_count() >= 3));
        assert!(!poller.is_finished());

        poller.stop();
        let stopped_at = producer.engine().poll_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(producer.engine().poll_count(), stopped_at);
    }

    #[test]
    #[serial]
    fn test_poller_exits_when_producer_is_dropped() {
        let producer = polling_producer();
        let poller = producer.spawn_poller().unwrap();
        assert!(wait_until(|| producer.engine().poll_count() >= 1));

        drop(producer);
        assert!(wait_until(|| poller.is_finished()));
    }
}
