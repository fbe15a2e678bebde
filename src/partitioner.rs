//! Partition selection for messages submitted without an explicit partition.
//!
//! The native engine calls the topic's [`Partitioner`] synchronously from its
//! enqueue path, possibly from several submitting threads at once. Every
//! implementation here is lock-free.
//!
//! # Strategies
//!
//! - [`RoundRobinPartitioner`]: cycles through partitions with one atomic
//!   cursor per topic, skipping unavailable ones for at most
//!   `partition_count` attempts.
//! - [`RandomPartitioner`]: uniform random choice, one retry if the first pick
//!   is unavailable.
//! - [`Murmur2Partitioner`]: Kafka-compatible key hashing; keyless messages
//!   fall back to random.

use std::fmt;
use std::sync::Arc;

use murmur2::{KAFKA_SEED, murmur2};
use rand::Rng;

use crate::handle::Correlation;
use crate::sync::{AtomicU64, Ordering};
use crate::types::Partition;

/// Answers whether a partition can currently accept writes (has a leader).
pub trait PartitionAvailability {
    fn is_available(&self, partition: Partition) -> bool;
}

impl<F> PartitionAvailability for F
where
    F: Fn(Partition) -> bool,
{
    fn is_available(&self, partition: Partition) -> bool {
        self(partition)
    }
}

/// Every partition is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllAvailable;

impl PartitionAvailability for AllAvailable {
    fn is_available(&self, _partition: Partition) -> bool {
        true
    }
}

/// Chooses a destination partition during enqueue.
///
/// Implementations must never block and must always terminate. The message
/// identity is borrowed read-only; a partitioner never mutates or keeps it.
pub trait Partitioner: Send + Sync {
    /// Pick a partition in `[0, partition_count)`.
    ///
    /// Returns [`Partition::UNASSIGNED`] when `partition_count <= 0`, which
    /// the engine reports as an unknown partition.
    fn partition(
        &self,
        key: &[u8],
        partition_count: i32,
        availability: &dyn PartitionAvailability,
        message: &Correlation,
    ) -> Partition;

    fn kind(&self) -> PartitionerKind;
}

/// Partitioner selection, made once per topic at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionerKind {
    #[default]
    RoundRobin,
    Random,
    Murmur2,
}

impl PartitionerKind {
    /// Build a fresh partitioner. Round-robin cursors are never shared
    /// between topics.
    pub fn build(self) -> Arc<dyn Partitioner> {
        match self {
            PartitionerKind::RoundRobin => Arc::new(RoundRobinPartitioner::new()),
            PartitionerKind::Random => Arc::new(RandomPartitioner),
            PartitionerKind::Murmur2 => Arc::new(Murmur2Partitioner),
        }
    }
}

impl fmt::Display for PartitionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionerKind::RoundRobin => write!(f, "round-robin"),
            PartitionerKind::Random => write!(f, "random"),
            PartitionerKind::Murmur2 => write!(f, "murmur2"),
        }
    }
}

impl std::str::FromStr for PartitionerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round-robin" | "roundrobin" | "rr" => Ok(PartitionerKind::RoundRobin),
            "random" => Ok(PartitionerKind::Random),
            "murmur2" | "hash" => Ok(PartitionerKind::Murmur2),
            _ => Err(format!(
                "Unknown partitioner '{}'. Valid partitioners: round-robin, random, murmur2",
                s
            )),
        }
    }
}

/// Round-robin over partitions with bounded availability skipping.
///
/// Each call advances the shared cursor with `fetch_add`, so concurrent
/// callers observe distinct cursor values and the modular sequence is
/// preserved across threads. If no candidate is available after
/// `partition_count` attempts the last candidate is returned anyway.
pub struct RoundRobinPartitioner {
    cursor: AtomicU64,
}

impl RoundRobinPartitioner {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(0),
        }
    }

    /// Current cursor position (number of candidates handed out so far).
    pub fn position(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Pick the next partition without message context.
    pub fn next_partition(
        &self,
        partition_count: i32,
        availability: &dyn PartitionAvailability,
    ) -> Partition {
        if partition_count <= 0 {
            return Partition::UNASSIGNED;
        }

        let count = partition_count as u64;
        let mut candidate = Partition::UNASSIGNED;
        for _ in 0..partition_count {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed);
            candidate = Partition::new((index % count) as i32);
            if availability.is_available(candidate) {
                break;
            }
        }
        candidate
    }
}

impl Default for RoundRobinPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RoundRobinPartitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinPartitioner")
            .field("position", &self.position())
            .finish()
    }
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(
        &self,
        _key: &[u8],
        partition_count: i32,
        availability: &dyn PartitionAvailability,
        _message: &Correlation,
    ) -> Partition {
        self.next_partition(partition_count, availability)
    }

    fn kind(&self) -> PartitionerKind {
        PartitionerKind::RoundRobin
    }
}

/// Uniform random partitioning. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPartitioner;

impl RandomPartitioner {
    fn pick(partition_count: i32, availability: &dyn PartitionAvailability) -> Partition {
        if partition_count <= 0 {
            return Partition::UNASSIGNED;
        }

        let mut rng = rand::thread_rng();
        let first = Partition::new(rng.gen_range(0..partition_count));
        if availability.is_available(first) {
            first
        } else {
            Partition::new(rng.gen_range(0..partition_count))
        }
    }
}

impl Partitioner for RandomPartitioner {
    fn partition(
        &self,
        _key: &[u8],
        partition_count: i32,
        availability: &dyn PartitionAvailability,
        _message: &Correlation,
    ) -> Partition {
        Self::pick(partition_count, availability)
    }

    fn kind(&self) -> PartitionerKind {
        PartitionerKind::Random
    }
}

/// Kafka-compatible key hashing (`toPositive(murmur2(key)) % partitions`).
///
/// Keyed messages always land on the same partition regardless of
/// availability, like the Java client's default partitioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur2Partitioner;

impl Murmur2Partitioner {
    /// Partition for `key`, or [`Partition::UNASSIGNED`] when
    /// `partition_count <= 0`.
    pub fn hash_partition(key: &[u8], partition_count: i32) -> Partition {
        if partition_count <= 0 {
            return Partition::UNASSIGNED;
        }
        let hash = murmur2(key, KAFKA_SEED);
        Partition::new(((hash & 0x7fff_ffff) as i32) % partition_count)
    }
}

impl Partitioner for Murmur2Partitioner {
    fn partition(
        &self,
        key: &[u8],
        partition_count: i32,
        availability: &dyn PartitionAvailability,
        _message: &Correlation,
    ) -> Partition {
        if key.is_empty() {
            return RandomPartitioner::pick(partition_count, availability);
        }
        Self::hash_partition(key, partition_count)
    }

    fn kind(&self) -> PartitionerKind {
        PartitionerKind::Murmur2
    }
}
