//! Batch builder and result scanner.
//!
//! A [`Batch`] is a fixed-length array of message slots submitted together.
//! Each stored slot owns one [`OpaqueHandle`]; the engine only ever sees a
//! borrowed [`Correlation`] for batch members, so the batch is the single
//! place those handles are released.
//!
//! # Lifecycle
//!
//! ```text
//!   Batch::new(size) ──► store_item(i, ..) for i in 0..size ──► engine.produce_batch
//!        ──► next_error / errors() / error_at / payload_at ──► destroy (or drop)
//! ```
//!
//! Validation failures are written into the slots synchronously by the
//! engine, so scanning never waits for delivery reports.

use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::alloc::Tracked;
use crate::error::{Error, KafkaCode, Result};
use crate::handle::{Correlation, OpaqueHandle};
use crate::types::{BatchId, Partition, TopicId};

/// One message descriptor inside a batch.
#[derive(Default)]
pub struct MessageSlot {
    key: Bytes,
    payload: Bytes,
    handle: Option<OpaqueHandle>,
    partition: Partition,
    err: KafkaCode,
}

impl MessageSlot {
    #[inline]
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Outcome code; [`KafkaCode::None`] until the engine reports a failure.
    #[inline]
    pub fn err(&self) -> KafkaCode {
        self.err
    }

    pub fn set_error(&mut self, code: KafkaCode) {
        self.err = code;
    }

    /// Partition assigned at enqueue, [`Partition::UNASSIGNED`] before.
    #[inline]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn set_partition(&mut self, partition: Partition) {
        self.partition = partition;
    }

    /// Whether `store_item` has attached a handle to this slot.
    #[inline]
    pub fn is_stored(&self) -> bool {
        self.handle.is_some()
    }

    /// Identity the engine carries for this slot.
    pub fn correlation(&self) -> Option<Correlation> {
        self.handle.as_ref().map(OpaqueHandle::correlation)
    }

    pub fn userdata(&self) -> Option<&[u8]> {
        self.handle.as_ref().and_then(OpaqueHandle::userdata)
    }
}

impl fmt::Debug for MessageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSlot")
            .field("key_len", &self.key.len())
            .field("payload_len", &self.payload.len())
            .field("stored", &self.is_stored())
            .field("partition", &self.partition)
            .field("err", &self.err)
            .finish()
    }
}

/// A failed slot found while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchError<'a> {
    pub index: usize,
    pub code: KafkaCode,
    pub userdata: Option<&'a [u8]>,
}

/// A fixed-length group of messages submitted and tracked together.
pub struct Batch {
    id: BatchId,
    topic: TopicId,
    len: usize,
    slots: Vec<MessageSlot>,
    /// Accounts for the descriptor array; `None` once destroyed.
    descriptor: Option<Tracked>,
}

impl Batch {
    /// Allocate a zeroed batch of `size` slots for `topic`.
    ///
    /// Fails with [`Error::InvalidBatchSize`] when `size <= 0`, before any
    /// allocation.
    pub fn new(topic: TopicId, size: i32) -> Result<Self> {
        if size <= 0 {
            return Err(Error::InvalidBatchSize(size));
        }
        let len = size as usize;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed(len * std::mem::size_of::<MessageSlot>()))?;
        slots.resize_with(len, MessageSlot::default);

        Ok(Self {
            id: BatchId::next(),
            topic,
            len,
            slots,
            descriptor: Some(Tracked::acquire()),
        })
    }

    #[inline]
    pub fn id(&self) -> BatchId {
        self.id
    }

    #[inline]
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Length fixed at creation. Unchanged by `destroy`.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.descriptor.is_none()
    }

    /// Every slot has a handle attached.
    pub fn is_ready(&self) -> bool {
        !self.is_destroyed() && self.slots.iter().all(MessageSlot::is_stored)
    }

    /// Attach a message to slot `index`, creating its handle.
    ///
    /// Storing into an already stored slot replaces it; the previous handle is
    /// released. An empty payload is stored with [`KafkaCode::InvalidArg`] so
    /// the engine skips it and the scan reports it.
    pub fn store_item(
        &mut self,
        index: usize,
        key: &[u8],
        payload: &[u8],
        userdata: Option<&[u8]>,
    ) -> Result<()> {
        self.check_index(index)?;
        let handle = OpaqueHandle::new(self.topic, index, Some(self.id), userdata)?;

        self.slots[index] = MessageSlot {
            key: Bytes::copy_from_slice(key),
            payload: Bytes::copy_from_slice(payload),
            handle: Some(handle),
            partition: Partition::UNASSIGNED,
            err: if payload.is_empty() {
                KafkaCode::InvalidArg
            } else {
                KafkaCode::None
            },
        };
        Ok(())
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [MessageSlot] {
        &mut self.slots
    }

    pub fn slot(&self, index: usize) -> Result<&MessageSlot> {
        self.check_index(index)?;
        Ok(&self.slots[index])
    }

    /// First failed slot at or after `from`, or `None`.
    ///
    /// Restart with `found + 1` to enumerate every failure in one forward
    /// pass.
    pub fn next_error(&self, from: usize) -> Option<usize> {
        self.slots
            .get(from..)?
            .iter()
            .position(|slot| slot.err.is_error())
            .map(|offset| from + offset)
    }

    /// Error code of slot `index`.
    pub fn error_at(&self, index: usize) -> Result<KafkaCode> {
        self.check_index(index)?;
        Ok(self.slots[index].err)
    }

    /// Userdata attached to slot `index`, for reporting failures upstream.
    pub fn payload_at(&self, index: usize) -> Result<Option<&[u8]>> {
        self.check_index(index)?;
        Ok(self.slots[index].userdata())
    }

    /// Iterate every failed slot in ascending index order.
    pub fn errors(&self) -> ErrorScan<'_> {
        ErrorScan {
            batch: self,
            next: 0,
        }
    }

    /// Number of slots currently carrying an error.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Release every slot handle and the descriptor array.
    ///
    /// Returns `false` if the batch was already destroyed; the allocation
    /// counter is touched only by the first call.
    pub fn destroy(&mut self) -> bool {
        let Some(descriptor) = self.descriptor.take() else {
            return false;
        };

        let stored = self.slots.iter().filter(|slot| slot.is_stored()).count();
        self.slots.clear();
        drop(descriptor);

        debug!(batch = %self.id, topic = %self.topic, released = stored, "Batch destroyed");
        true
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::BatchDestroyed);
        }
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("len", &self.len)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Forward scan over the failed slots of a batch.
pub struct ErrorScan<'a> {
    batch: &'a Batch,
    next: usize,
}

impl<'a> Iterator for ErrorScan<'a> {
    type Item = BatchError<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.batch.next_error(self.next)?;
        self.next = index + 1;
        let slot = &self.batch.slots[index];
        Some(BatchError {
            index,
            code: slot.err,
            userdata: slot.userdata(),
        })
    }
}
