use super::sink::{NoopUsageSink, UsageEvent, UsageSink};
use crate::cache::DEFAULT_NAMESPACE;
use crate::clock::{system_clock, SharedClock};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// One completed call, as seen by the request pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub namespace: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_estimate: f64,
    pub cache_hit: bool,
}

impl UsageRecord {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_estimate: 0.0,
            cache_hit: false,
        }
    }
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
    pub fn with_tokens(mut self, prompt: u64, completion: u64) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self
    }
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = cost;
        self
    }
    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageScope {
    Process,
    Client,
    Namespace(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_estimate: f64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub scope: UsageScope,
    pub total_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_estimate: f64,
    pub cache_hits: u64,
    /// Keyed by `provider/model`.
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl UsageStats {
    pub fn empty(scope: UsageScope) -> Self {
        Self {
            scope,
            total_requests: 0,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            total_cost_estimate: 0.0,
            cache_hits: 0,
            by_model: BTreeMap::new(),
        }
    }

    fn apply(&mut self, r: &UsageRecord) {
        let hit = u64::from(r.cache_hit);
        self.total_requests += 1;
        self.total_prompt_tokens += r.prompt_tokens;
        self.total_completion_tokens += r.completion_tokens;
        self.total_tokens += r.total_tokens();
        self.total_cost_estimate += r.cost_estimate;
        self.cache_hits += hit;

        let m = self
            .by_model
            .entry(format!("{}/{}", r.provider, r.model))
            .or_default();
        m.requests += 1;
        m.prompt_tokens += r.prompt_tokens;
        m.completion_tokens += r.completion_tokens;
        m.cost_estimate += r.cost_estimate;
        m.cache_hits += hit;
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

fn lock_stats<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        warn!("usage ledger lock poisoned; recovering");
        poisoned.into_inner()
    })
}

/// Counters for a single scope.
#[derive(Debug)]
pub struct UsageLedger {
    stats: Mutex<UsageStats>,
}

impl UsageLedger {
    pub fn new(scope: UsageScope) -> Self {
        Self {
            stats: Mutex::new(UsageStats::empty(scope)),
        }
    }

    /// A process-wide ledger to hand to several trackers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(UsageScope::Process))
    }

    pub fn record(&self, record: &UsageRecord) {
        lock_stats(&self.stats).apply(record);
    }

    pub fn snapshot(&self) -> UsageStats {
        lock_stats(&self.stats).clone()
    }

    pub fn reset(&self) {
        let mut s = lock_stats(&self.stats);
        let scope = s.scope.clone();
        *s = UsageStats::empty(scope);
    }
}

pub struct UsageTracker {
    process: Arc<UsageLedger>,
    client: UsageLedger,
    namespaces: Mutex<HashMap<String, UsageStats>>,
    sink: Arc<dyn UsageSink>,
    clock: SharedClock,
}

impl UsageTracker {
    /// Tracker with its own process ledger.
    pub fn new() -> Self {
        Self::with_process_ledger(UsageLedger::shared())
    }

    pub fn with_process_ledger(process: Arc<UsageLedger>) -> Self {
        Self {
            process,
            client: UsageLedger::new(UsageScope::Client),
            namespaces: Mutex::new(HashMap::new()),
            sink: Arc::new(NoopUsageSink),
            clock: system_clock(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn process_ledger(&self) -> Arc<UsageLedger> {
        self.process.clone()
    }

    /// Fold one record into every scope. Sink failures are logged only.
    pub fn record(&self, record: UsageRecord) {
        self.process.record(&record);
        self.client.record(&record);
        {
            let ns = if record.namespace.is_empty() {
                DEFAULT_NAMESPACE
            } else {
                record.namespace.as_str()
            };
            let mut map = lock_stats(&self.namespaces);
            map.entry(ns.to_string())
                .or_insert_with(|| UsageStats::empty(UsageScope::Namespace(ns.to_string())))
                .apply(&record);
        }
        let event = UsageEvent::new(self.clock.now_millis(), record);
        if let Err(e) = self.sink.persist(&event) {
            warn!(event_id = %event.id, error = %e, "usage sink failed; event dropped");
        }
    }

    pub fn snapshot(&self, scope: &UsageScope) -> Result<UsageStats> {
        match scope {
            UsageScope::Process => Ok(self.process.snapshot()),
            UsageScope::Client => Ok(self.client.snapshot()),
            UsageScope::Namespace(ns) => {
                validate_namespace(ns)?;
                Ok(lock_stats(&self.namespaces)
                    .get(ns)
                    .cloned()
                    .unwrap_or_else(|| UsageStats::empty(scope.clone())))
            }
        }
    }

    pub fn reset(&self, scope: &UsageScope) -> Result<()> {
        match scope {
            UsageScope::Process => self.process.reset(),
            UsageScope::Client => self.client.reset(),
            UsageScope::Namespace(ns) => {
                validate_namespace(ns)?;
                lock_stats(&self.namespaces).remove(ns);
            }
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_stats(&self.namespaces).keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_namespace(ns: &str) -> Result<()> {
    if ns.is_empty() {
        return Err(Error::validation_with_context(
            "usage scope namespace must not be empty",
            ErrorContext::new()
                .with_field_path("scope.namespace")
                .with_source("usage_tracker"),
        ));
    }
    Ok(())
}
