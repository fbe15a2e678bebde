//! Process-wide accounting of memory handed across the native boundary.
//!
//! Every allocation whose lifetime spans the native engine (opaque handle
//! records, copies of user payloads, batch descriptor arrays) holds a
//! [`Tracked`] token. The token increments the global counter when created
//! and decrements it when dropped, so the counter is exactly the number of
//! such allocations alive right now.
//!
//! After every in-flight message has been reported and every batch destroyed
//! the counter is back where it started; anything else is a leak.
//!
//! # Usage
//!
//! ```rust
//! use kafkaesque_bridge::alloc::{TrackedBuffer, allocation_count};
//!
//! let before = allocation_count();
//! let buffer = TrackedBuffer::copy_from(b"userdata").unwrap();
//! assert_eq!(allocation_count(), before + 1);
//! drop(buffer);
//! assert_eq!(allocation_count(), before);
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::sync::{AtomicI64, Ordering};

/// Live tracked allocations. Only reset by process start.
#[cfg(not(feature = "loom"))]
static ALLOC_COUNTER: AtomicI64 = AtomicI64::new(0);

// Loom atomics have no const constructor; loom resets this per execution.
#[cfg(feature = "loom")]
loom::lazy_static! {
    static ref ALLOC_COUNTER: AtomicI64 = AtomicI64::new(0);
}

/// Number of tracked allocations currently alive.
pub fn allocation_count() -> i64 {
    ALLOC_COUNTER.load(Ordering::Acquire)
}

/// Accounting token for one live allocation.
///
/// Not `Clone`: a token is released exactly once, when its owner drops it.
pub struct Tracked {
    _private: (),
}

impl Tracked {
    pub(crate) fn acquire() -> Self {
        ALLOC_COUNTER.fetch_add(1, Ordering::AcqRel);
        Tracked { _private: () }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        ALLOC_COUNTER.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tracked")
    }
}

/// A zero-initialised, tracked byte buffer.
pub struct TrackedBuffer {
    data: Box<[u8]>,
    _tracked: Tracked,
}

impl TrackedBuffer {
    /// Allocate `size` zeroed bytes.
    ///
    /// Fails with [`Error::AllocationFailed`] instead of aborting when the
    /// allocator cannot satisfy the request.
    pub fn allocate(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::AllocationFailed(size))?;
        data.resize(size, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            _tracked: Tracked::acquire(),
        })
    }

    /// Allocate a tracked copy of `bytes`.
    pub fn copy_from(bytes: &[u8]) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len())
            .map_err(|_| Error::AllocationFailed(bytes.len()))?;
        data.extend_from_slice(bytes);
        Ok(Self {
            data: data.into_boxed_slice(),
            _tracked: Tracked::acquire(),
        })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for TrackedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for TrackedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Release an optional allocation. `None` is a no-op.
#[inline]
pub fn release<T>(allocation: Option<T>) {
    drop(allocation);
}
