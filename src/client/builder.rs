use crate::cache::{CacheKeyBuilder, CacheManager};
use crate::client::adapter::ProviderAdapter;
use crate::client::core::LlmClient;
use crate::clock::{system_clock, SharedClock};
use crate::config::CoreConfig;
use crate::resilience::RateLimiter;
use crate::tokens::{PricingTable, TokenCounter};
use crate::usage::{UsageLedger, UsageSink, UsageTracker};
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builder for [`LlmClient`].
///
/// Components not supplied explicitly are built from the [`CoreConfig`].
/// Pass shared handles (`with_cache`, `with_rate_limiter`,
/// `with_process_ledger`) to let several clients draw from the same state.
pub struct LlmClientBuilder {
    config: CoreConfig,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    clock: SharedClock,
    cache: Option<Arc<CacheManager>>,
    limiter: Option<Arc<RateLimiter>>,
    process_ledger: Option<Arc<UsageLedger>>,
    sink: Option<Arc<dyn UsageSink>>,
    counter: Option<Arc<dyn TokenCounter>>,
    key_salt: Option<String>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            adapters: HashMap::new(),
            clock: system_clock(),
            cache: None,
            limiter: None,
            process_ledger: None,
            sink: None,
            counter: None,
            key_salt: None,
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an adapter under its own [`ProviderAdapter::name`].
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_process_ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.process_ledger = Some(ledger);
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use one estimator for every model instead of picking one per model family.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Salt for cache keys; ignored when a prebuilt cache is supplied.
    pub fn with_cache_key_salt(mut self, salt: impl Into<String>) -> Self {
        self.key_salt = Some(salt.into());
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        self.config.validate()?;
        if self.adapters.is_empty() {
            return Err(Error::configuration_with_context(
                "at least one provider adapter is required",
                ErrorContext::new().with_source("llm_client_builder"),
            ));
        }

        let cache = match self.cache {
            Some(c) => c,
            None => {
                let mut keys = CacheKeyBuilder::new();
                if let Some(salt) = self.key_salt {
                    keys = keys.with_salt(salt);
                }
                let manager =
                    CacheManager::from_settings_with_clock(&self.config.cache, self.clock.clone())?
                        .with_key_builder(keys);
                Arc::new(manager)
            }
        };

        let limiter = match self.limiter {
            Some(l) => l,
            None => Arc::new(RateLimiter::with_clock(
                self.config.rate_limits.clone(),
                self.clock.clone(),
            )?),
        };

        let mut usage = UsageTracker::with_process_ledger(
            self.process_ledger.unwrap_or_else(UsageLedger::shared),
        )
        .with_clock(self.clock);
        if let Some(sink) = self.sink {
            usage = usage.with_sink(sink);
        }

        let mut providers: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        providers.sort_unstable();
        info!(
            cache_backend = cache.backend_name(),
            namespace = cache.namespace(),
            providers = ?providers,
            "llm client ready"
        );

        Ok(LlmClient {
            adapters: self.adapters,
            cache,
            limiter,
            usage: Arc::new(usage),
            pricing: PricingTable::new(self.config.pricing),
            counter: self.counter,
        })
    }
}

impl Default for LlmClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
