//! Type-safe wrappers for the identifiers carried across the native boundary.
//!
//! These newtypes keep topic ids, batch ids and partitions from being mixed
//! up even though they all travel as plain integers inside an opaque handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a logical topic registered with a producer.
///
/// Ids are assigned in registration order, starting at zero, and are only
/// meaningful for the producer that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TopicId(pub u32);

impl TopicId {
    #[inline]
    pub const fn new(value: u32) -> Self {
        TopicId(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Position of this topic in a dense, id-indexed table.
    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TopicId {
    fn from(value: u32) -> Self {
        TopicId(value)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Groups the handles of messages submitted together in one batch.
///
/// Batch ids are process-wide and strictly increasing; see [`BatchId::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

impl BatchId {
    /// Allocate the next batch id.
    pub fn next() -> Self {
        BatchId(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A destination partition index.
///
/// # Special Values
///
/// - `-1` (`UNASSIGNED`): let the topic's partitioner choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition(pub i32);

impl Partition {
    /// No partition requested; the partitioner decides at enqueue time.
    pub const UNASSIGNED: Self = Partition(-1);

    #[inline]
    pub const fn new(value: i32) -> Self {
        Partition(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl Default for Partition {
    fn default() -> Self {
        Partition::UNASSIGNED
    }
}

impl From<i32> for Partition {
    fn from(value: i32) -> Self {
        Partition(value)
    }
}

impl From<Partition> for i32 {
    fn from(partition: Partition) -> Self {
        partition.0
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
