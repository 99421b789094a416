//! Batch execution with per-item results.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchExecutor`] | Runs a closure over items sequentially or with bounded concurrency |
//! | [`BatchStrategy`] | `Sequential` or `Concurrent { max_concurrency }` |
//! | [`BatchResult`] | Successes and failures by input index, with timing |
//!
//! Results always come back in input order. One failing item never aborts its
//! siblings, and once the cancellation token fires no further item is started;
//! those items resolve to [`Error::Cancelled`](crate::Error::Cancelled).

mod executor;

pub use executor::{BatchExecutor, BatchExecutorConfig, BatchResult, BatchStrategy};
