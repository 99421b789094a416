use crate::batch::BatchExecutor;
use crate::cache::CacheManager;
use crate::client::adapter::ProviderAdapter;
use crate::client::signals::SignalsSnapshot;
use crate::resilience::{RateLimiter, Reservation};
use crate::tokens::{counter_for_model, estimate_request_tokens, PricingTable, TokenCounter};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::usage::{UsageRecord, UsageScope, UsageStats, UsageTracker};
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Request pipeline over injected provider adapters.
///
/// Per call: rate limiter admission (async backoff) → cache lookup → adapter
/// call on miss → cache store → usage record → limiter reconciliation.
pub struct LlmClient {
    pub(crate) adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    pub(crate) cache: Arc<CacheManager>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) usage: Arc<UsageTracker>,
    pub(crate) pricing: PricingTable,
    /// Fixed estimator; `None` picks one from the request's model.
    pub(crate) counter: Option<Arc<dyn TokenCounter>>,
}

impl LlmClient {
    pub fn builder() -> crate::client::builder::LlmClientBuilder {
        crate::client::builder::LlmClientBuilder::new()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn usage_snapshot(&self, scope: &UsageScope) -> Result<UsageStats> {
        self.usage.snapshot(scope)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn signals(&self, provider: &str, model: &str) -> SignalsSnapshot {
        SignalsSnapshot {
            cache: self.cache.stats(),
            rate_limiter: self.limiter.snapshot(provider, model),
            usage: self
                .usage
                .snapshot(&UsageScope::Client)
                .unwrap_or_else(|_| UsageStats::empty(UsageScope::Client)),
        }
    }

    fn adapter_for(&self, provider: &str) -> Result<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).ok_or_else(|| {
            Error::validation_with_context(
                "no adapter registered for provider",
                ErrorContext::new()
                    .with_field_path("request.provider")
                    .with_details(provider.to_string())
                    .with_source("llm_client"),
            )
        })
    }

    fn namespace_for<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        match request.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => self.cache.namespace(),
        }
    }

    fn estimate(&self, request: &CompletionRequest) -> u64 {
        match self.counter {
            Some(ref counter) => estimate_request_tokens(counter.as_ref(), request),
            None => estimate_request_tokens(&counter_for_model(&request.model), request),
        }
    }

    fn reconcile(&self, reservation: &Reservation, actual_tokens: u64) {
        if let Err(e) = self.limiter.report_actual(reservation, actual_tokens) {
            warn!(
                provider = %reservation.provider,
                model = %reservation.model,
                error = %e,
                "failed to reconcile token usage"
            );
        }
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.complete_with_cancel(request, None).await
    }

    /// Single call that gives up with [`Error::Cancelled`] if `cancel` fires
    /// before the provider call is issued. An issued call runs to completion.
    pub async fn complete_with_cancel(
        &self,
        request: &CompletionRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<CompletionResponse> {
        request.validate()?;
        let adapter = self.adapter_for(&request.provider)?;
        let namespace = self.namespace_for(request);
        let estimated = self.estimate(request);

        let admission = self
            .limiter
            .acquire_async(&request.provider, &request.model, estimated);
        let reservation = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                r = admission => r?,
            },
            None => admission.await?,
        };

        let key = self.cache.key_for(namespace, request);
        if let Some(mut hit) = self.cache.get_json::<CompletionResponse>(namespace, &key) {
            hit.cached = true;
            self.reconcile(&reservation, 0);
            self.usage.record(
                UsageRecord::new(&request.provider, &request.model)
                    .with_namespace(namespace)
                    .with_cache_hit(true),
            );
            return Ok(hit);
        }

        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            self.reconcile(&reservation, 0);
            return Err(Error::Cancelled);
        }

        debug!(
            provider = %request.provider,
            model = %request.model,
            namespace,
            estimated,
            "cache miss; calling provider"
        );
        // Provider errors pass through as-is; the reservation keeps its estimate.
        let mut response = adapter.complete(request).await?;
        response.cached = false;

        self.cache.put_json(namespace, &key, &response);
        let cost = self.pricing.cost(
            &request.model,
            response.prompt_tokens,
            response.completion_tokens,
        );
        self.usage.record(
            UsageRecord::new(&request.provider, &request.model)
                .with_namespace(namespace)
                .with_tokens(response.prompt_tokens, response.completion_tokens)
                .with_cost(cost),
        );
        self.reconcile(&reservation, response.total_tokens());
        Ok(response)
    }

    /// Run requests with at most `concurrency` in flight.
    ///
    /// Results preserve input order; one failure never aborts the others.
    pub async fn complete_batch(
        &self,
        requests: Vec<CompletionRequest>,
        concurrency: usize,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<CompletionResponse>> {
        self.run_batch(BatchExecutor::concurrent(concurrency), requests, cancel)
            .await
    }

    pub async fn complete_batch_sequential(
        &self,
        requests: Vec<CompletionRequest>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<CompletionResponse>> {
        self.run_batch(BatchExecutor::sequential(), requests, cancel)
            .await
    }

    async fn run_batch(
        &self,
        executor: BatchExecutor,
        requests: Vec<CompletionRequest>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<CompletionResponse>> {
        if requests.is_empty() {
            return Vec::new();
        }
        executor
            .execute(requests, cancel, move |_, req| async move {
                self.complete_with_cancel(&req, cancel).await
            })
            .await
    }
}
