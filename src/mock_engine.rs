//! In-memory native engine for testing.
//!
//! [`MockEngine`] implements [`NativeProducer`] without any network: accepted
//! messages are reported from a background delivery thread, or held until
//! the test delivers them by hand with [`MockEngine::deliver`].
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! kafkaesque-bridge = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! Enqueue validation mirrors a real client: unknown topics, oversized
//! payloads, a full outbound queue and out-of-range partitions are rejected
//! synchronously. The topic's partitioner runs on the producing thread.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::batch::MessageSlot;
use crate::config::ProducerConfig;
use crate::constants::DEFAULT_MOCK_PARTITIONS;
use crate::error::{Error, KafkaCode, Result};
use crate::handle::{Correlation, DeliveryToken};
use crate::native::{EngineCallbacks, NativeProducer, NativeTopic, Rejected};
use crate::partitioner::Partitioner;
use crate::relay::LogLevel;
use crate::types::{Partition, TopicId};

/// Decides the delivery code of each message in immediate mode.
pub type OutcomeFn = Arc<dyn Fn(&MockMessage) -> KafkaCode + Send + Sync>;

/// When accepted messages are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// A background thread reports every message as soon as it can.
    #[default]
    Immediate,
    /// Messages wait in [`MockEngine::pending`] until delivered by hand.
    Manual,
}

/// Mock engine settings.
#[derive(Clone, Default)]
pub struct MockConfig {
    /// Partition count per topic name.
    pub partitions: HashMap<String, i32>,
    /// Partition count for topics not listed above; `0` means the default.
    pub default_partitions: i32,
    /// Partitions without a leader, for every topic.
    pub unavailable: HashSet<i32>,
    pub mode: DeliveryMode,
    /// Delivery code per message in immediate mode; success when unset.
    pub outcome: Option<OutcomeFn>,
    /// Pause before each immediate delivery.
    pub delivery_delay: Duration,
    /// Keep a copy of every accepted message for [`MockEngine::produced`].
    pub record: bool,
}

impl MockConfig {
    pub fn manual() -> Self {
        Self {
            mode: DeliveryMode::Manual,
            ..Default::default()
        }
    }

    pub fn with_partitions(mut self, topic: &str, count: i32) -> Self {
        self.partitions.insert(topic.to_string(), count);
        self
    }

    pub fn with_default_partitions(mut self, count: i32) -> Self {
        self.default_partitions = count;
        self
    }

    pub fn with_unavailable(mut self, partition: i32) -> Self {
        self.unavailable.insert(partition);
        self
    }

    pub fn with_outcome<F>(mut self, outcome: F) -> Self
    where
        F: Fn(&MockMessage) -> KafkaCode + Send + Sync + 'static,
    {
        self.outcome = Some(Arc::new(outcome));
        self
    }

    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    pub fn with_recording(mut self) -> Self {
        self.record = true;
        self
    }

    fn partitions_for(&self, topic: &str) -> i32 {
        self.partitions.get(topic).copied().unwrap_or({
            if self.default_partitions > 0 {
                self.default_partitions
            } else {
                DEFAULT_MOCK_PARTITIONS
            }
        })
    }
}

impl fmt::Debug for MockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConfig")
            .field("partitions", &self.partitions)
            .field("default_partitions", &self.default_partitions)
            .field("unavailable", &self.unavailable)
            .field("mode", &self.mode)
            .field("outcome", &self.outcome.is_some())
            .field("delivery_delay", &self.delivery_delay)
            .field("record", &self.record)
            .finish()
    }
}

/// A message accepted by the mock engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    /// Enqueue order, starting at zero.
    pub seq: u64,
    pub topic: TopicId,
    pub partition: Partition,
    pub correlation: Correlation,
    pub key: Bytes,
    pub payload: Bytes,
}

struct Queued {
    message: MockMessage,
    token: DeliveryToken,
}

struct MockTopic {
    name: String,
    partitions: i32,
    partitioner: Arc<dyn Partitioner>,
}

/// State shared with the delivery thread.
struct Shared {
    callbacks: Arc<dyn EngineCallbacks>,
    outq: AtomicUsize,
    served: Mutex<u64>,
    served_cv: Condvar,
    destroyed: AtomicBool,
    dropped: AtomicUsize,
    outcome: Option<OutcomeFn>,
    delivery_delay: Duration,
}

impl Shared {
    fn deliver(&self, queued: Queued, code: KafkaCode) {
        let Queued { message, token } = queued;
        trace!(seq = message.seq, code = code.raw(), "Mock delivery");
        self.callbacks.on_delivery(code, message.partition, token);
        self.finish();
    }

    fn discard(&self, queued: Queued) {
        drop(queued);
        self.dropped.fetch_add(1, Ordering::AcqRel);
        self.finish();
    }

    fn finish(&self) {
        self.outq.fetch_sub(1, Ordering::AcqRel);
        let mut served = lock(&self.served);
        *served += 1;
        self.served_cv.notify_all();
    }

    fn run(&self, rx: Receiver<Queued>) {
        for queued in rx.iter() {
            if !self.delivery_delay.is_zero() && !self.destroyed.load(Ordering::Acquire) {
                thread::sleep(self.delivery_delay);
            }
            if self.destroyed.load(Ordering::Acquire) {
                self.discard(queued);
                continue;
            }
            let code = self
                .outcome
                .as_ref()
                .map_or(KafkaCode::None, |outcome| outcome(&queued.message));
            self.deliver(queued, code);
        }
    }
}

/// In-memory [`NativeProducer`].
pub struct MockEngine {
    shared: Arc<Shared>,
    config: MockConfig,
    capacity: usize,
    max_bytes: usize,
    topics: DashMap<TopicId, MockTopic>,
    next_seq: AtomicU64,
    pending: Mutex<BTreeMap<u64, Queued>>,
    produced: Mutex<Vec<MockMessage>>,
    polls: AtomicUsize,
    sender: Mutex<Option<Sender<Queued>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MockEngine {
    /// Messages held for manual delivery, in enqueue order.
    pub fn pending(&self) -> Vec<MockMessage> {
        lock(&self.pending)
            .values()
            .map(|queued| queued.message.clone())
            .collect()
    }

    /// Report message `seq` with `code`. Returns `false` if it is not pending.
    ///
    /// The callback runs on the calling thread.
    pub fn deliver(&self, seq: u64, code: KafkaCode) -> bool {
        let queued = lock(&self.pending).remove(&seq);
        match queued {
            Some(queued) => {
                self.shared.deliver(queued, code);
                true
            }
            None => false,
        }
    }

    /// Report every pending message with `code`.
    pub fn deliver_all(&self, code: KafkaCode) -> usize {
        let drained = std::mem::take(&mut *lock(&self.pending));
        let count = drained.len();
        for queued in drained.into_values() {
            self.shared.deliver(queued, code);
        }
        count
    }

    /// Every message accepted so far, in enqueue order. Empty unless
    /// recording was enabled with [`MockConfig::with_recording`].
    pub fn produced(&self) -> Vec<MockMessage> {
        lock(&self.produced).clone()
    }

    /// Number of `poll` calls served so far.
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::Acquire)
    }

    /// Messages dropped by `destroy` without a report.
    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::Acquire)
    }

    pub fn partition_count(&self, topic: TopicId) -> Option<i32> {
        self.topics.get(&topic).map(|entry| entry.partitions)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    /// Raise a producer-level error through the callbacks.
    pub fn emit_error(&self, code: KafkaCode, reason: &str) {
        self.shared.callbacks.on_error(code, reason);
    }

    /// Raise an engine log line through the callbacks.
    pub fn emit_log(&self, level: LogLevel, facility: &str, message: &str) {
        self.shared.callbacks.on_log(level, facility, message);
    }

    /// Validate an enqueue and reserve a queue slot for it.
    fn admit(
        &self,
        topic: TopicId,
        partition: Partition,
        key: &[u8],
        payload: &[u8],
        correlation: &Correlation,
    ) -> std::result::Result<Partition, KafkaCode> {
        if self.is_destroyed() {
            return Err(KafkaCode::Destroy);
        }
        let entry = self.topics.get(&topic).ok_or(KafkaCode::UnknownTopic)?;
        if payload.len() > self.max_bytes {
            return Err(KafkaCode::MessageSizeTooLarge);
        }

        let partition = if partition.is_assigned() {
            partition
        } else {
            let unavailable = &self.config.unavailable;
            let availability = |p: Partition| !unavailable.contains(&p.value());
            entry
                .partitioner
                .partition(key, entry.partitions, &availability, correlation)
        };
        if !(0..entry.partitions).contains(&partition.value()) {
            return Err(KafkaCode::UnknownPartition);
        }

        let capacity = self.capacity;
        self.shared
            .outq
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < capacity).then_some(queued + 1)
            })
            .map_err(|_| KafkaCode::QueueFull)?;

        Ok(partition)
    }

    fn enqueue(
        &self,
        topic: TopicId,
        partition: Partition,
        key: Bytes,
        payload: Bytes,
        token: DeliveryToken,
    ) {
        let message = MockMessage {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            topic,
            partition,
            correlation: token.correlation(),
            key,
            payload,
        };
        if self.config.record {
            lock(&self.produced).push(message.clone());
        }
        let queued = Queued { message, token };

        match self.config.mode {
            DeliveryMode::Manual => {
                lock(&self.pending).insert(queued.message.seq, queued);
            }
            DeliveryMode::Immediate => {
                let sender = lock(&self.sender);
                let unsent = match sender.as_ref() {
                    Some(tx) => tx.send(queued).err().map(|e| e.into_inner()),
                    None => Some(queued),
                };
                drop(sender);
                if let Some(queued) = unsent {
                    self.shared.discard(queued);
                }
            }
        }
    }
}

impl NativeProducer for MockEngine {
    type Config = MockConfig;

    fn create(
        settings: &ProducerConfig,
        config: MockConfig,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            callbacks,
            outq: AtomicUsize::new(0),
            served: Mutex::new(0),
            served_cv: Condvar::new(),
            destroyed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
            outcome: config.outcome.clone(),
            delivery_delay: config.delivery_delay,
        });

        let (sender, worker) = match config.mode {
            DeliveryMode::Immediate => {
                let (tx, rx) = crossbeam_channel::unbounded();
                let worker_shared = shared.clone();
                let handle = thread::Builder::new()
                    .name("mock-engine-delivery".to_string())
                    .spawn(move || worker_shared.run(rx))
                    .map_err(|e| Error::Engine(format!("failed to spawn delivery thread: {}", e)))?;
                (Some(tx), Some(handle))
            }
            DeliveryMode::Manual => (None, None),
        };

        debug!(client_id = %settings.client_id, mode = ?config.mode, "Mock engine created");

        Ok(Self {
            shared,
            config,
            capacity: settings.queue_buffering_max_messages,
            max_bytes: settings.message_max_bytes,
            topics: DashMap::new(),
            next_seq: AtomicU64::new(0),
            pending: Mutex::new(BTreeMap::new()),
            produced: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        })
    }

    fn add_topic(&self, topic: NativeTopic) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Closed);
        }
        let partitions = self.config.partitions_for(&topic.name);
        self.shared.callbacks.on_log(
            LogLevel::Debug,
            "TOPIC",
            &format!("New local topic: {} [{} partitions]", topic.name, partitions),
        );
        self.topics.insert(
            topic.id,
            MockTopic {
                name: topic.name,
                partitions,
                partitioner: topic.partitioner,
            },
        );
        Ok(())
    }

    fn produce(
        &self,
        topic: TopicId,
        partition: Partition,
        key: Bytes,
        payload: Bytes,
        token: DeliveryToken,
    ) -> std::result::Result<(), Rejected> {
        match self.admit(topic, partition, &key, &payload, &token.correlation()) {
            Ok(partition) => {
                self.enqueue(topic, partition, key, payload, token);
                Ok(())
            }
            Err(code) => Err(Rejected { code, token }),
        }
    }

    fn produce_batch(
        &self,
        topic: TopicId,
        partition: Partition,
        slots: &mut [MessageSlot],
    ) -> usize {
        let mut accepted = 0;
        for slot in slots.iter_mut() {
            if slot.err().is_error() {
                continue;
            }
            let Some(correlation) = slot.correlation() else {
                slot.set_error(KafkaCode::InvalidArg);
                continue;
            };
            match self.admit(topic, partition, slot.key(), slot.payload(), &correlation) {
                Ok(assigned) => {
                    slot.set_partition(assigned);
                    slot.set_error(KafkaCode::None);
                    self.enqueue(
                        topic,
                        assigned,
                        slot.key().clone(),
                        slot.payload().clone(),
                        DeliveryToken::Borrowed(correlation),
                    );
                    accepted += 1;
                }
                Err(code) => slot.set_error(code),
            }
        }
        accepted
    }

    fn poll(&self, timeout: Duration) -> usize {
        self.polls.fetch_add(1, Ordering::AcqRel);
        let deadline = Instant::now() + timeout;
        let mut served = lock(&self.shared.served);
        let start = *served;

        while *served == start && self.outq_len() > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .shared
                .served_cv
                .wait_timeout(served, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            served = guard;
        }

        (*served - start) as usize
    }

    fn outq_len(&self) -> usize {
        self.shared.outq.load(Ordering::Acquire)
    }

    fn destroy(&self) -> usize {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let held = std::mem::take(&mut *lock(&self.pending));
        for queued in held.into_values() {
            self.shared.discard(queued);
        }

        drop(lock(&self.sender).take());
        if let Some(handle) = lock(&self.worker).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let dropped = self.dropped();
        debug!(dropped, "Mock engine destroyed");
        dropped
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockEngine")
            .field("mode", &self.config.mode)
            .field("topics", &self.topics.len())
            .field("outq", &self.outq_len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl fmt::Debug for MockTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTopic")
            .field("name", &self.name)
            .field("partitions", &self.partitions)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::alloc::allocation_count;
    use crate::handle::OpaqueHandle;
    use crate::partitioner::PartitionerKind;
    use serial_test::serial;

    #[derive(Default)]
    struct Counting {
        reports: Mutex<Vec<(KafkaCode, Partition, Correlation)>>,
    }

    impl EngineCallbacks for Counting {
        fn on_delivery(&self, code: KafkaCode, partition: Partition, token: DeliveryToken) {
            lock(&self.reports).push((code, partition, token.correlation()));
        }
        fn on_error(&self, _code: KafkaCode, _reason: &str) {}
        fn on_log(&self, _level: LogLevel, _facility: &str, _message: &str) {}
    }

    fn engine(config: MockConfig) -> (MockEngine, Arc<Counting>) {
        let callbacks = Arc::new(Counting::default());
        let engine = MockEngine::create(&ProducerConfig::default(), config, callbacks.clone())
            .unwrap();
        engine
            .add_topic(NativeTopic {
                id: TopicId(0),
                name: "t".to_string(),
                partitioner: PartitionerKind::RoundRobin.build(),
            })
            .unwrap();
        (engine, callbacks)
    }

    fn token() -> DeliveryToken {
        DeliveryToken::Owned(OpaqueHandle::new(TopicId(0), 0, None, None).unwrap())
    }

    #[test]
    #[serial]
    fn test_manual_delivery_in_any_order() {
        let (engine, callbacks) = engine(MockConfig::manual().with_partitions("t", 3));
        for _ in 0..3 {
            engine
                .produce(
                    TopicId(0),
                    Partition::UNASSIGNED,
                    Bytes::new(),
                    Bytes::from_static(b"x"),
                    token(),
                )
                .unwrap();
        }
        let pending = engine.pending();
        assert_eq!(pending.len(), 3);
        assert_eq!(
            pending.iter().map(|m| m.partition.value()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(engine.outq_len(), 3);

        assert!(engine.deliver(2, KafkaCode::None));
        assert!(!engine.deliver(2, KafkaCode::None));
        assert_eq!(engine.deliver_all(KafkaCode::Transport), 2);
        assert_eq!(engine.outq_len(), 0);
        assert_eq!(lock(&callbacks.reports).len(), 3);
    }

    #[test]
    #[serial]
    fn test_immediate_mode_reports_from_worker() {
        let (engine, callbacks) = engine(MockConfig::default());
        engine
            .produce(TopicId(0), Partition(1), Bytes::new(), Bytes::from_static(b"x"), token())
            .unwrap();
        while engine.outq_len() > 0 {
            engine.poll(Duration::from_millis(50));
        }
        let reports = lock(&callbacks.reports);
        assert_eq!(reports[0].0, KafkaCode::None);
        assert_eq!(reports[0].1, Partition(1));
    }

    #[test]
    #[serial]
    fn test_synchronous_rejections_return_token() {
        let settings = ProducerConfig {
            queue_buffering_max_messages: 1,
            message_max_bytes: 4,
            ..Default::default()
        };
        let callbacks = Arc::new(Counting::default());
        let engine = MockEngine::create(&settings, MockConfig::manual(), callbacks).unwrap();
        engine
            .add_topic(NativeTopic {
                id: TopicId(0),
                name: "t".to_string(),
                partitioner: PartitionerKind::Random.build(),
            })
            .unwrap();

        let before = allocation_count();
        let cases = [
            (TopicId(9), Partition::UNASSIGNED, "abc", KafkaCode::UnknownTopic),
            (TopicId(0), Partition::UNASSIGNED, "too long", KafkaCode::MessageSizeTooLarge),
            (TopicId(0), Partition(99), "abc", KafkaCode::UnknownPartition),
        ];
        for (topic, partition, payload, expected) in cases {
            let rejected = engine
                .produce(topic, partition, Bytes::new(), Bytes::from(payload), token())
                .unwrap_err();
            assert_eq!(rejected.code, expected);
            assert!(rejected.token.is_owned());
        }
        assert_eq!(allocation_count(), before);

        engine
            .produce(TopicId(0), Partition::UNASSIGNED, Bytes::new(), Bytes::from("ok"), token())
            .unwrap();
        let full = engine
            .produce(TopicId(0), Partition::UNASSIGNED, Bytes::new(), Bytes::from("ok"), token())
            .unwrap_err();
        assert_eq!(full.code, KafkaCode::QueueFull);
    }

    #[test]
    #[serial]
    fn test_destroy_drops_pending_and_releases() {
        let before = allocation_count();
        let (engine, callbacks) = engine(MockConfig::manual());
        for _ in 0..4 {
            engine
                .produce(TopicId(0), Partition::UNASSIGNED, Bytes::new(), Bytes::from("x"), token())
                .unwrap();
        }
        assert_eq!(engine.destroy(), 4);
        assert_eq!(engine.destroy(), 0);
        assert_eq!(allocation_count(), before);
        assert!(lock(&callbacks.reports).is_empty());

        let rejected = engine
            .produce(TopicId(0), Partition::UNASSIGNED, Bytes::new(), Bytes::from("x"), token())
            .unwrap_err();
        assert_eq!(rejected.code, KafkaCode::Destroy);
    }

    #[test]
    #[serial]
    fn test_poll_returns_immediately_when_idle() {
        let (engine, _) = engine(MockConfig::default());
        let started = Instant::now();
        assert_eq!(engine.poll(Duration::from_secs(5)), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.poll_count(), 1);
    }

    #[test]
    #[serial]
    fn test_recording_is_opt_in() {
        let (quiet, _) = engine(MockConfig::manual());
        let (recorded, _) = engine(MockConfig::manual().with_recording());
        for engine in [&quiet, &recorded] {
            engine
                .produce(TopicId(0), Partition(0), Bytes::new(), Bytes::from("x"), token())
                .unwrap();
            engine.deliver_all(KafkaCode::None);
        }
        assert!(quiet.produced().is_empty());
        let produced = recorded.produced();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].payload, Bytes::from("x"));
    }
}
