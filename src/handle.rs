//! Opaque handles attached to every in-flight message.
//!
//! A handle carries everything the delivery path needs to route an outcome
//! back to the request that produced it: the topic id, the position inside a
//! batch, the batch id and an optional copy of the caller's userdata. All of
//! it lives inside the token itself, so no lookup table is consulted when a
//! report comes back from the engine.
//!
//! # Ownership
//!
//! ```text
//!   submit()  ──► OpaqueHandle ──► DeliveryToken::Owned ──► engine ──► bridge (drop)
//!   batch     ──► OpaqueHandle stays in its slot          ──► Batch::destroy (drop)
//!                 engine only sees DeliveryToken::Borrowed(Correlation)
//! ```
//!
//! A handle is never `Clone`; releasing it means dropping it, and only the
//! single owner can do that.

use std::fmt;
use std::time::{Duration, Instant};

use crate::alloc::{Tracked, TrackedBuffer};
use crate::error::Result;
use crate::types::{BatchId, TopicId};

/// Copyable identity of an in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correlation {
    /// Topic the message was submitted to.
    pub topic: TopicId,
    /// Slot inside the batch, `0` for single submissions.
    pub index: usize,
    /// Batch the message belongs to, `None` for single submissions.
    pub batch: Option<BatchId>,
}

impl Correlation {
    pub const fn single(topic: TopicId) -> Self {
        Self {
            topic,
            index: 0,
            batch: None,
        }
    }

    pub const fn in_batch(topic: TopicId, batch: BatchId, index: usize) -> Self {
        Self {
            topic,
            index,
            batch: Some(batch),
        }
    }
}

/// Per-message routing record, owned by exactly one party at a time.
pub struct OpaqueHandle {
    correlation: Correlation,
    userdata: Option<TrackedBuffer>,
    enqueued_at: Instant,
    _tracked: Tracked,
}

impl OpaqueHandle {
    /// Create a handle, copying `userdata` into a tracked buffer.
    ///
    /// Empty or absent userdata is stored as `None` and costs no extra
    /// allocation. Allocation failure is returned, never swallowed.
    pub fn new(
        topic: TopicId,
        index: usize,
        batch: Option<BatchId>,
        userdata: Option<&[u8]>,
    ) -> Result<Self> {
        let userdata = match userdata {
            Some(bytes) if !bytes.is_empty() => Some(TrackedBuffer::copy_from(bytes)?),
            _ => None,
        };

        Ok(Self {
            correlation: Correlation {
                topic,
                index,
                batch,
            },
            userdata,
            enqueued_at: Instant::now(),
            _tracked: Tracked::acquire(),
        })
    }

    #[inline]
    pub fn correlation(&self) -> Correlation {
        self.correlation
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

    /// Caller userdata, valid for as long as the handle is borrowed.
    #[inline]
    pub fn userdata(&self) -> Option<&[u8]> {
        self.userdata.as_ref().map(TrackedBuffer::as_slice)
    }

    #[inline]
    pub fn userdata_len(&self) -> usize {
        self.userdata.as_ref().map_or(0, TrackedBuffer::len)
    }

    /// Time since the handle was created at submission.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueHandle")
            .field("topic", &self.correlation.topic)
            .field("index", &self.correlation.index)
            .field("batch", &self.correlation.batch)
            .field("userdata_len", &self.userdata_len())
            .finish()
    }
}

/// What the engine carries for one queued message and hands back with its
/// delivery report.
#[derive(Debug)]
pub enum DeliveryToken {
    /// Single-message path: the engine owns the handle until it reports.
    Owned(OpaqueHandle),
    /// Batch path: the batch keeps the handle, the engine only sees identity.
    Borrowed(Correlation),
}

impl DeliveryToken {
    pub fn correlation(&self) -> Correlation {
        match self {
            DeliveryToken::Owned(handle) => handle.correlation(),
            DeliveryToken::Borrowed(correlation) => *correlation,
        }
    }

    /// Whether dropping this token releases tracked memory.
    pub fn is_owned(&self) -> bool {
        matches!(self, DeliveryToken::Owned(_))
    }
}
