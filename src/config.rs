//! Plain configuration objects.
//!
//! Everything the core needs arrives through [`CoreConfig`]; nothing is read
//! from the environment. Cross-field invariants are checked by `validate()`,
//! which every constructor calls, so a bad configuration fails at setup rather
//! than on the first request.

use crate::tokens::ModelPricing;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Null,
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub sqlite_path: Option<PathBuf>,
    pub namespace: String,
    /// `None` keeps entries until LRU eviction or an explicit clear.
    pub ttl_seconds: Option<u64>,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            sqlite_path: None,
            namespace: crate::cache::DEFAULT_NAMESPACE.to_string(),
            ttl_seconds: None,
            max_entries: 1000,
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_backend(mut self, backend: CacheBackendKind) -> Self {
        self.backend = backend;
        self
    }
    /// Select the SQLite backend stored at `path`.
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = CacheBackendKind::Sqlite;
        self.sqlite_path = Some(path.into());
        self
    }
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
    pub fn with_ttl_seconds(mut self, ttl: Option<u64>) -> Self {
        self.ttl_seconds = ttl;
        self
    }
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::configuration_with_context(
                "max_entries must be at least 1",
                ErrorContext::new().with_field_path("cache.max_entries"),
            ));
        }
        if self.backend == CacheBackendKind::Sqlite && self.sqlite_path.is_none() {
            return Err(Error::configuration_with_context(
                "sqlite backend requires a database path",
                ErrorContext::new().with_field_path("cache.sqlite_path"),
            ));
        }
        Ok(())
    }
}

/// Budget for one provider or provider/model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    /// Defaults to `tokens_per_minute * 1440` when omitted.
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
}

impl RateLimits {
    pub fn new(requests_per_minute: u64, tokens_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            tokens_per_day: None,
        }
    }

    pub fn with_tokens_per_day(mut self, tpd: u64) -> Self {
        self.tokens_per_day = Some(tpd);
        self
    }

    pub fn effective_tokens_per_day(&self) -> u64 {
        self.tokens_per_day
            .unwrap_or_else(|| self.tokens_per_minute.saturating_mul(1440))
    }

    /// Check the ratio invariants; `field` names the config entry in errors.
    pub fn validate(&self, field: &str) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(Error::configuration_with_context(
                "requests_per_minute must be positive",
                ErrorContext::new().with_field_path(format!("{}.requests_per_minute", field)),
            ));
        }
        let min_tpm = self.requests_per_minute.saturating_mul(10);
        if self.tokens_per_minute < min_tpm {
            return Err(Error::configuration_with_context(
                "tokens_per_minute must be at least 10x requests_per_minute",
                ErrorContext::new()
                    .with_field_path(format!("{}.tokens_per_minute", field))
                    .with_details(format!(
                        "got {}, expected >= {}",
                        self.tokens_per_minute, min_tpm
                    )),
            ));
        }
        if let Some(tpd) = self.tokens_per_day {
            let max_tpd = self.tokens_per_minute.saturating_mul(1440);
            if tpd > max_tpd {
                return Err(Error::configuration_with_context(
                    "tokens_per_day cannot exceed tokens_per_minute * 1440",
                    ErrorContext::new()
                        .with_field_path(format!("{}.tokens_per_day", field))
                        .with_details(format!("got {}, expected <= {}", tpd, max_tpd)),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Longest single backoff a caller accepts before the limiter rejects.
    pub max_wait_ms: u64,
    /// Applied to providers without their own entry. `None` = unthrottled.
    pub default: Option<RateLimits>,
    /// Keyed by provider name.
    pub providers: BTreeMap<String, RateLimits>,
    /// Keyed by `provider/model`; wins over the provider entry.
    pub models: BTreeMap<String, RateLimits>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_wait_ms: 60_000,
            default: None,
            providers: BTreeMap::new(),
            models: BTreeMap::new(),
        }
    }
}

impl RateLimitSettings {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = max_wait.as_millis() as u64;
        self
    }
    pub fn with_default(mut self, limits: RateLimits) -> Self {
        self.default = Some(limits);
        self
    }
    pub fn with_provider(mut self, provider: impl Into<String>, limits: RateLimits) -> Self {
        self.providers.insert(provider.into(), limits);
        self
    }
    pub fn with_model(
        mut self,
        provider: &str,
        model: &str,
        limits: RateLimits,
    ) -> Self {
        self.models.insert(format!("{}/{}", provider, model), limits);
        self
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Most specific limits for a provider/model pair.
    pub fn limits_for(&self, provider: &str, model: &str) -> Option<RateLimits> {
        self.models
            .get(&format!("{}/{}", provider, model))
            .or_else(|| self.providers.get(provider))
            .or(self.default.as_ref())
            .copied()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(d) = &self.default {
            d.validate("rate_limits.default")?;
        }
        for (name, limits) in &self.providers {
            limits.validate(&format!("rate_limits.providers.{}", name))?;
        }
        for (name, limits) in &self.models {
            limits.validate(&format!("rate_limits.models.{}", name))?;
        }
        Ok(())
    }
}

/// Top-level configuration object, usually produced by a setup tool or file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache: CacheSettings,
    pub rate_limits: RateLimitSettings,
    /// Per-model pricing overrides; keys are model names.
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimitSettings) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing.insert(pricing.model.clone(), pricing);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.rate_limits.validate()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(Error::configuration_with_context(
                "unsupported configuration file format",
                ErrorContext::new()
                    .with_details(format!("extension: {:?}", other))
                    .with_source("config_loader"),
            )),
        }
    }
}
