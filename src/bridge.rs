//! Delivery callback bridge.
//!
//! [`DeliveryBridge`] is the single sink the engine reports message outcomes
//! to. For every report it decodes the token, updates per-topic statistics,
//! notifies the caller's [`DeliveryHandler`] and then drops the token, which
//! releases the handle for single sends.
//!
//! # Policy
//!
//! Every outcome is notified, success and failure alike, and every owned
//! handle is released afterwards. A panicking handler is caught and logged;
//! it never prevents the release.
//!
//! # Handlers
//!
//! ```rust
//! use kafkaesque_bridge::bridge::{DeliveryHandler, DeliveryReport, delivery_fn};
//!
//! // Any closure works.
//! let handler = delivery_fn(|report| {
//!     if !report.is_success() {
//!         eprintln!("message {} failed: {}", report.index(), report.code);
//!     }
//! });
//!
//! // Or split success and failure.
//! struct Failures;
//! impl DeliveryHandler for Failures {
//!     fn on_failed(&self, report: &DeliveryReport<'_>) {
//!         eprintln!("failed: {}", report.code);
//!     }
//! }
//! # let _ = (handler, Failures);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::KafkaCode;
use crate::handle::{Correlation, DeliveryToken};
use crate::native::EngineCallbacks;
use crate::relay::{EventHandler, LogLevel};
use crate::types::{BatchId, Partition, TopicId};

/// Outcome of one message, borrowed for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryReport<'a> {
    pub code: KafkaCode,
    pub correlation: Correlation,
    pub partition: Partition,
    /// Caller userdata. Always `None` for batch members, whose handles stay
    /// in the batch.
    pub userdata: Option<&'a [u8]>,
    /// Time from submission to report, single sends only.
    pub round_trip: Option<Duration>,
}

impl DeliveryReport<'_> {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.code.is_ok()
    }

    #[inline]
    pub fn topic(&self) -> TopicId {
        self.correlation.topic
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.correlation.index
    }

    #[inline]
    pub fn batch(&self) -> Option<BatchId> {
        self.correlation.batch
    }

    pub fn to_outcome(&self) -> DeliveryOutcome {
        DeliveryOutcome {
            code: self.code,
            correlation: self.correlation,
            partition: self.partition,
            userdata: self.userdata.map(<[u8]>::to_vec),
            round_trip: self.round_trip,
        }
    }
}

/// Owned copy of a [`DeliveryReport`] that can outlive the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub code: KafkaCode,
    pub correlation: Correlation,
    pub partition: Partition,
    pub userdata: Option<Vec<u8>>,
    pub round_trip: Option<Duration>,
}

impl DeliveryOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.code.is_ok()
    }
}

/// Receives message outcomes on the engine's delivery thread.
///
/// The userdata slice inside a report is only valid during the call; copy it
/// if it is needed later. Override [`on_delivery`](Self::on_delivery) to see
/// every outcome, or the split methods to see one kind.
pub trait DeliveryHandler: Send + Sync {
    fn on_delivery(&self, report: &DeliveryReport<'_>) {
        if report.is_success() {
            self.on_delivered(report);
        } else {
            self.on_failed(report);
        }
    }

    fn on_delivered(&self, _report: &DeliveryReport<'_>) {}

    fn on_failed(&self, _report: &DeliveryReport<'_>) {}
}

impl<F> DeliveryHandler for F
where
    F: Fn(&DeliveryReport<'_>) + Send + Sync,
{
    fn on_delivery(&self, report: &DeliveryReport<'_>) {
        self(report)
    }
}

/// Pin a closure to the [`DeliveryHandler`] signature.
///
/// Lets the compiler infer the report type of an unannotated closure.
pub fn delivery_fn<F>(handler: F) -> F
where
    F: Fn(&DeliveryReport<'_>) + Send + Sync,
{
    handler
}

/// Ignores every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl DeliveryHandler for NoopHandler {}

/// Forwards owned outcomes into a tokio channel for async consumers.
///
/// The channel is unbounded so the delivery thread never blocks. Outcomes
/// sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<DeliveryOutcome>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveryOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DeliveryHandler for ChannelHandler {
    fn on_delivery(&self, report: &DeliveryReport<'_>) {
        if self.tx.send(report.to_outcome()).is_err() {
            trace!(topic = %report.topic(), "Delivery receiver dropped, outcome discarded");
        }
    }
}

/// Per-topic delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub delivered: u64,
    pub failed: u64,
    pub round_trip_total: Duration,
    pub round_trip_samples: u64,
}

impl TopicStats {
    pub fn total(&self) -> u64 {
        self.delivered + self.failed
    }

    /// Mean submission-to-report time over single sends.
    pub fn avg_round_trip(&self) -> Option<Duration> {
        if self.round_trip_samples == 0 {
            return None;
        }
        let samples = u32::try_from(self.round_trip_samples).unwrap_or(u32::MAX);
        Some(self.round_trip_total / samples)
    }

    fn record(&mut self, report: &DeliveryReport<'_>) {
        if report.is_success() {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
        if let Some(rtt) = report.round_trip {
            self.round_trip_total += rtt;
            self.round_trip_samples += 1;
        }
    }
}

/// The engine's callback sink.
pub struct DeliveryBridge {
    handler: Arc<dyn DeliveryHandler>,
    events: Arc<dyn EventHandler>,
    stats: DashMap<TopicId, TopicStats>,
    reports: AtomicU64,
    handler_panics: AtomicU64,
}

impl DeliveryBridge {
    pub fn new(handler: Arc<dyn DeliveryHandler>, events: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            events,
            stats: DashMap::new(),
            reports: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
        }
    }

    /// Snapshot of the counters for `topic`.
    pub fn topic_stats(&self, topic: TopicId) -> TopicStats {
        self.stats
            .get(&topic)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Delivery reports processed so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Handler invocations that panicked.
    pub fn handler_panics(&self) -> u64 {
        self.handler_panics.load(Ordering::Relaxed)
    }
}

impl EngineCallbacks for DeliveryBridge {
    fn on_delivery(&self, code: KafkaCode, partition: Partition, token: DeliveryToken) {
        {
            let (userdata, round_trip) = match &token {
                DeliveryToken::Owned(handle) => (handle.userdata(), Some(handle.elapsed())),
                DeliveryToken::Borrowed(_) => (None, None),
            };
            let report = DeliveryReport {
                code,
                correlation: token.correlation(),
                partition,
                userdata,
                round_trip,
            };

            trace!(
                topic = %report.topic(),
                index = report.index(),
                batch = ?report.batch(),
                partition = %partition,
                code = code.raw(),
                "Delivery report"
            );

            self.stats.entry(report.topic()).or_default().record(&report);
            self.reports.fetch_add(1, Ordering::Relaxed);

            let handler = &self.handler;
            if panic::catch_unwind(AssertUnwindSafe(|| handler.on_delivery(&report))).is_err() {
                self.handler_panics.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %report.topic(),
                    index = report.index(),
                    "Delivery handler panicked, releasing handle"
                );
            }
        }
        drop(token);
    }

    fn on_error(&self, code: KafkaCode, reason: &str) {
        self.events.on_error(code, reason);
    }

    fn on_log(&self, level: LogLevel, facility: &str, message: &str) {
        self.events.on_log(level, facility, message);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::alloc::allocation_count;
    use crate::handle::OpaqueHandle;
    use crate::relay::TracingRelay;
    use serial_test::serial;
    use std::sync::Mutex;

    fn bridge_with(handler: impl DeliveryHandler + 'static) -> DeliveryBridge {
        DeliveryBridge::new(Arc::new(handler), Arc::new(TracingRelay))
    }

    fn bridge_fn<F>(handler: F) -> DeliveryBridge
    where
        F: Fn(&DeliveryReport<'_>) + Send + Sync + 'static,
    {
        bridge_with(delivery_fn(handler))
    }

    fn owned(topic: u32, userdata: &[u8]) -> DeliveryToken {
        DeliveryToken::Owned(OpaqueHandle::new(TopicId(topic), 0, None, Some(userdata)).unwrap())
    }

    #[test]
    #[serial]
    fn test_success_and_failure_are_both_notified_and_released() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let bridge = bridge_fn(move |r| {
            sink.lock()
                .unwrap()
                .push((r.code, r.userdata.map(<[u8]>::to_vec)));
        });

        let before = allocation_count();
        let ok = owned(0, b"first");
        let failed = owned(0, b"second");
        assert_eq!(allocation_count(), before + 4);

        bridge.on_delivery(KafkaCode::None, Partition(1), ok);
        bridge.on_delivery(KafkaCode::MessageTimedOut, Partition(2), failed);
        assert_eq!(allocation_count(), before);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (KafkaCode::None, Some(b"first".to_vec())));
        assert_eq!(seen[1], (KafkaCode::MessageTimedOut, Some(b"second".to_vec())));

        let stats = bridge.topic_stats(TopicId(0));
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.round_trip_samples, 2);
        assert!(stats.avg_round_trip().is_some());
        assert_eq!(bridge.reports(), 2);
    }

    #[test]
    #[serial]
    fn test_panicking_handler_still_releases() {
        let bridge = bridge_fn(|_| panic!("handler bug"));
        let before = allocation_count();
        let token = owned(1, b"x");
        bridge.on_delivery(KafkaCode::None, Partition(0), token);
        assert_eq!(allocation_count(), before);
        assert_eq!(bridge.handler_panics(), 1);
    }

    #[test]
    #[serial]
    fn test_borrowed_token_reports_without_userdata() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let bridge = bridge_fn(move |r| {
            *sink.lock().unwrap() = Some(r.to_outcome());
        });

        let batch = BatchId::next();
        let correlation = Correlation::in_batch(TopicId(2), batch, 7);
        let before = allocation_count();
        bridge.on_delivery(
            KafkaCode::None,
            Partition(0),
            DeliveryToken::Borrowed(correlation),
        );
        assert_eq!(allocation_count(), before);

        let outcome = seen.lock().unwrap().clone().unwrap();
        assert_eq!(outcome.correlation, correlation);
        assert!(outcome.userdata.is_none());
        assert!(outcome.round_trip.is_none());
        assert_eq!(bridge.topic_stats(TopicId(2)).round_trip_samples, 0);
    }

    #[test]
    #[serial]
    fn test_split_handler_dispatch() {
        #[derive(Default)]
        struct Split {
            delivered: AtomicU64,
            failed: AtomicU64,
        }
        impl DeliveryHandler for Split {
            fn on_delivered(&self, _report: &DeliveryReport<'_>) {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            fn on_failed(&self, _report: &DeliveryReport<'_>) {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let split = Arc::new(Split::default());
        let bridge = DeliveryBridge::new(split.clone(), Arc::new(TracingRelay));
        bridge.on_delivery(KafkaCode::None, Partition(0), owned(0, b""));
        bridge.on_delivery(KafkaCode::Transport, Partition(0), owned(0, b""));
        bridge.on_delivery(KafkaCode::Transport, Partition(0), owned(0, b""));
        assert_eq!(split.delivered.load(Ordering::Relaxed), 1);
        assert_eq!(split.failed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_channel_handler_forwards_outcomes() {
        let (handler, mut rx) = ChannelHandler::new();
        let bridge = bridge_with(handler);
        bridge.on_delivery(KafkaCode::None, Partition(3), owned(4, b"ctx"));

        let outcome = rx.recv().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.partition, Partition(3));
        assert_eq!(outcome.userdata.as_deref(), Some(&b"ctx"[..]));
    }

    #[test]
    fn test_avg_round_trip() {
        let stats = TopicStats {
            delivered: 2,
            failed: 0,
            round_trip_total: Duration::from_millis(30),
            round_trip_samples: 2,
        };
        assert_eq!(stats.avg_round_trip(), Some(Duration::from_millis(15)));
        assert_eq!(stats.total(), 2);
        assert_eq!(TopicStats::default().avg_round_trip(), None);
    }
}
