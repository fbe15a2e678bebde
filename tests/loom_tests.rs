//! Loom-based concurrency tests for the lock-free parts of the bridge.
//!
//! These tests use the Loom library to explore every interleaving of the
//! atomics involved in partition selection and allocation accounting.
//!
//! # What These Tests Cover
//!
//! 1. **Round-Robin Cursor** - The real [`RoundRobinPartitioner`] hands out
//!    distinct cursor values to concurrent callers, so two callers over two
//!    partitions always cover both.
//!
//! 2. **Bounded Skipping** - With an unavailable partition, concurrent calls
//!    terminate after at most `partition_count` cursor steps each.
//!
//! 3. **Acquire/Release Accounting** - Handles created on the submitting
//!    thread and released on the delivery thread return the allocation
//!    counter to zero.
//!
//! 4. **Batch Destroy vs. Confirmation** - Destroying a batch while its
//!    members are being confirmed releases every batch allocation exactly
//!    once.
//!
//! # Running Loom Tests
//!
//! Loom tests require the `loom` feature to be enabled:
//!
//! ```sh
//! cargo test --test loom_tests --features loom --release
//! ```
//!
//! Note: Loom tests can be slow as they explore all possible interleavings.

// Only compile these tests when the loom feature is enabled
#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::thread;

use kafkaesque_bridge::alloc::allocation_count;
use kafkaesque_bridge::batch::Batch;
use kafkaesque_bridge::bridge::{DeliveryBridge, NoopHandler};
use kafkaesque_bridge::error::KafkaCode;
use kafkaesque_bridge::handle::{DeliveryToken, OpaqueHandle};
use kafkaesque_bridge::native::EngineCallbacks;
use kafkaesque_bridge::partitioner::{AllAvailable, RoundRobinPartitioner};
use kafkaesque_bridge::relay::TracingRelay;
use kafkaesque_bridge::types::{Partition, TopicId};

/// Two concurrent callers over two partitions get one partition each.
#[test]
fn test_round_robin_concurrent_callers_get_distinct_partitions() {
    loom::model(|| {
        let rr = Arc::new(RoundRobinPartitioner::new());

        let rr1 = rr.clone();
        let t1 = thread::spawn(move || rr1.next_partition(2, &AllAvailable));
        let rr2 = rr.clone();
        let t2 = thread::spawn(move || rr2.next_partition(2, &AllAvailable));

        let a = t1.join().unwrap();
        let b = t2.join().unwrap();

        assert_ne!(a, b);
        assert_eq!(rr.position(), 2);
    });
}

/// Skipping an unavailable partition never loops past `partition_count`
/// attempts, whatever the other caller does to the cursor in between.
#[test]
fn test_round_robin_skipping_terminates() {
    loom::model(|| {
        let rr = Arc::new(RoundRobinPartitioner::new());
        let not_one = |p: Partition| p.value() != 1;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let rr = rr.clone();
                thread::spawn(move || rr.next_partition(2, &not_one))
            })
            .collect();

        for handle in handles {
            let picked = handle.join().unwrap();
            assert!((0..2).contains(&picked.value()));
        }

        let position = rr.position();
        assert!((2..=4).contains(&position));
    });
}

/// A handle is acquired on the submitting thread and released on whichever
/// thread delivers it, while the submitter allocates and releases another
/// handle for a synchronously rejected message.
#[test]
fn test_cross_thread_release_balances() {
    loom::model(|| {
        let handle = OpaqueHandle::new(TopicId(0), 0, None, Some(b"ctx")).unwrap();
        assert_eq!(allocation_count(), 2);

        let delivery = thread::spawn(move || drop(DeliveryToken::Owned(handle)));

        let rejected = OpaqueHandle::new(TopicId(0), 1, None, None).unwrap();
        drop(DeliveryToken::Owned(rejected));

        delivery.join().unwrap();
        assert_eq!(allocation_count(), 0);
    });
}

/// Batch members are confirmed through the bridge on one thread while the
/// caller destroys the batch on another. Borrowed confirmations never touch
/// the counter, so only the destroy releases the batch allocations.
#[test]
fn test_batch_destroy_races_confirmation() {
    loom::model(|| {
        let mut batch = Batch::new(TopicId(0), 2).unwrap();
        batch.store_item(0, b"k", b"a", None).unwrap();
        batch.store_item(1, b"k", b"b", Some(b"ud")).unwrap();
        // descriptor + 2 handles + 1 userdata copy
        assert_eq!(allocation_count(), 4);

        let confirmations: Vec<_> = (0..2)
            .filter_map(|i| batch.slot(i).unwrap().correlation())
            .collect();
        assert_eq!(confirmations.len(), 2);

        let bridge = DeliveryBridge::new(
            std::sync::Arc::new(NoopHandler),
            std::sync::Arc::new(TracingRelay),
        );
        let delivery = thread::spawn(move || {
            for correlation in confirmations {
                bridge.on_delivery(
                    KafkaCode::None,
                    Partition(0),
                    DeliveryToken::Borrowed(correlation),
                );
            }
            bridge.reports()
        });

        let destroy = thread::spawn(move || {
            let first = batch.destroy();
            let second = batch.destroy();
            (first, second)
        });

        assert_eq!(delivery.join().unwrap(), 2);
        assert_eq!(destroy.join().unwrap(), (true, false));
        assert_eq!(allocation_count(), 0);
    });
}
