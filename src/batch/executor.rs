//! Batch executor.

use crate::{Error, Result};
use futures::StreamExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct BatchResult<T, E> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, E)>,
    pub execution_time: Duration,
    pub total_processed: usize,
}

impl<T, E> BatchResult<T, E> {
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            execution_time: Duration::ZERO,
            total_processed: 0,
        }
    }
    pub fn add_success(&mut self, i: usize, r: T) {
        self.successes.push((i, r));
    }
    pub fn add_failure(&mut self, i: usize, e: E) {
        self.failures.push((i, e));
    }
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.successes.len() as f64 / self.total_processed as f64
        }
    }
}

impl<T> BatchResult<T, Error> {
    /// Split ordered per-item results by outcome.
    pub fn from_results(results: Vec<Result<T>>, execution_time: Duration) -> Self {
        let mut out = Self::new();
        out.total_processed = results.len();
        out.execution_time = execution_time;
        for (i, r) in results.into_iter().enumerate() {
            match r {
                Ok(v) => out.add_success(i, v),
                Err(e) => out.add_failure(i, e),
            }
        }
        out
    }

    /// Items that never started because the batch was cancelled.
    pub fn cancelled_count(&self) -> usize {
        self.failures
            .iter()
            .filter(|(_, e)| matches!(e, Error::Cancelled))
            .count()
    }
}

impl<T, E> Default for BatchResult<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    Sequential,
    Concurrent { max_concurrency: usize },
}
impl Default for BatchStrategy {
    fn default() -> Self {
        BatchStrategy::Concurrent { max_concurrency: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct BatchExecutorConfig {
    pub strategy: BatchStrategy,
    /// Sequential only: keep going after a failure. When false, the rest of
    /// the batch resolves to `Error::Cancelled`.
    pub continue_on_error: bool,
}
impl Default for BatchExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            continue_on_error: true,
        }
    }
}
impl BatchExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_strategy(mut self, s: BatchStrategy) -> Self {
        self.strategy = s;
        self
    }
    pub fn with_continue_on_error(mut self, c: bool) -> Self {
        self.continue_on_error = c;
        self
    }
}

pub struct BatchExecutor {
    config: BatchExecutorConfig,
}
impl BatchExecutor {
    pub fn new() -> Self {
        Self {
            config: BatchExecutorConfig::default(),
        }
    }
    pub fn with_config(config: BatchExecutorConfig) -> Self {
        Self { config }
    }
    pub fn sequential() -> Self {
        Self::with_config(BatchExecutorConfig::new().with_strategy(BatchStrategy::Sequential))
    }
    pub fn concurrent(max_concurrency: usize) -> Self {
        Self::with_config(BatchExecutorConfig::new().with_strategy(BatchStrategy::Concurrent {
            max_concurrency: max_concurrency.max(1),
        }))
    }
    pub fn config(&self) -> &BatchExecutorConfig {
        &self.config
    }

    /// Run `f` over every item; the output has one entry per input, in order.
    pub async fn execute<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> Vec<Result<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match self.config.strategy {
            BatchStrategy::Sequential => self.execute_sequential(items, cancel, f).await,
            BatchStrategy::Concurrent { max_concurrency } => {
                Self::execute_concurrent(items, max_concurrency, cancel, f).await
            }
        }
    }

    /// Like [`execute`](Self::execute), summarised into a [`BatchResult`].
    pub async fn execute_collect<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> BatchResult<R, Error>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let start = Instant::now();
        let results = self.execute(items, cancel, f).await;
        BatchResult::from_results(results, start.elapsed())
    }

    async fn execute_sequential<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> Vec<Result<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut out = Vec::with_capacity(items.len());
        let mut stopped = false;
        for (i, item) in items.into_iter().enumerate() {
            if stopped || is_cancelled(cancel) {
                out.push(Err(Error::Cancelled));
                continue;
            }
            let r = f(i, item).await;
            if r.is_err() && !self.config.continue_on_error {
                debug!(index = i, "batch stopped after failure");
                stopped = true;
            }
            out.push(r);
        }
        out
    }

    async fn execute_concurrent<T, R, F, Fut>(
        items: Vec<T>,
        max_concurrency: usize,
        cancel: Option<&CancellationToken>,
        f: F,
    ) -> Vec<Result<R>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let n = items.len();
        if n == 0 {
            return Vec::new();
        }
        let limit = max_concurrency.max(1);
        let f = &f;
        // buffer_unordered only creates a future when a slot frees up, so the
        // cancellation check runs at the moment an item would start.
        let results: Vec<(usize, Result<R>)> = futures::stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| async move {
                if is_cancelled(cancel) {
                    return (idx, Err(Error::Cancelled));
                }
                (idx, f(idx, item).await)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut out: Vec<Option<Result<R>>> = (0..n).map(|_| None).collect();
        for (idx, r) in results {
            out[idx] = Some(r);
        }
        out.into_iter()
            .map(|o| o.unwrap_or_else(|| Err(Error::runtime("batch result missing"))))
            .collect()
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.map(|c| c.is_cancelled()).unwrap_or(false)
}
