//! Atomics shared with the loom model checker.
//!
//! With the `loom` feature enabled these resolve to loom's instrumented
//! types, so `tests/loom_tests.rs` can explore every interleaving of the
//! real partition cursor and allocation counter. Loom types only work inside
//! `loom::model`.

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
