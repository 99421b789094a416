use async_trait::async_trait;
use llm_guard_core::cache::CacheManager;
use llm_guard_core::client::{CompletionRequest, CompletionResponse, LlmClient, ProviderAdapter};
use llm_guard_core::clock::Clock;
use llm_guard_core::config::{CacheBackendKind, CacheSettings, CoreConfig, RateLimitSettings, RateLimits};
use llm_guard_core::tokens::CharacterEstimator;
use llm_guard_core::usage::{InMemoryUsageSink, UsageScope};
use llm_guard_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Echoes the last message; prompts containing "fail" return a provider error,
/// prompts of the form "sleep:<ms>" delay before answering.
struct MockAdapter {
    calls: AtomicUsize,
}

impl MockAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Some(ms) = prompt.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if prompt.contains("fail") {
            return Err(Error::provider("mock", "upstream returned 500", true));
        }
        Ok(CompletionResponse::new(format!("echo: {}", prompt), &request.model).with_usage(7, 3))
    }
}

fn client_with(config: CoreConfig, adapter: Arc<MockAdapter>) -> LlmClient {
    LlmClient::builder()
        .with_config(config)
        .with_adapter(adapter)
        .build()
        .expect("client builds")
}

fn req(prompt: &str) -> CompletionRequest {
    CompletionRequest::new("mock", "gpt-4o").with_prompt(prompt)
}

#[tokio::test]
async fn test_second_identical_call_is_served_from_cache() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());

    let first = client.complete(&req("hello")).await.unwrap();
    let second = client.complete(&req("hello")).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.content, second.content);
    assert_eq!(adapter.calls(), 1);

    let usage = client.usage_snapshot(&UsageScope::Client).unwrap();
    assert_eq!(usage.total_requests, 2);
    assert_eq!(usage.cache_hits, 1);
    assert_eq!(usage.total_tokens, 10);
    let stats = client.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_namespaces_do_not_share_entries() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());

    client.complete(&req("hi").with_namespace("a")).await.unwrap();
    let b = client.complete(&req("hi").with_namespace("b")).await.unwrap();
    assert!(!b.cached);
    assert_eq!(adapter.calls(), 2);

    let a_usage = client
        .usage_snapshot(&UsageScope::Namespace("a".into()))
        .unwrap();
    assert_eq!(a_usage.total_requests, 1);
}

#[tokio::test]
async fn test_provider_error_passes_through_and_is_not_cached() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());

    let err = client.complete(&req("please fail")).await.unwrap_err();
    assert!(matches!(err, Error::Provider { retryable: true, .. }));
    assert!(client.complete(&req("please fail")).await.is_err());
    assert_eq!(adapter.calls(), 2);
    assert_eq!(
        client.usage_snapshot(&UsageScope::Client).unwrap().total_requests,
        0
    );
}

#[tokio::test]
async fn test_cost_and_limiter_reconciliation() {
    let adapter = MockAdapter::new();
    let config = CoreConfig::default()
        .with_rate_limits(RateLimitSettings::new().with_default(RateLimits::new(10, 1000)));
    let client = client_with(config, adapter);

    client.complete(&req("hello").with_max_tokens(200)).await.unwrap();

    let signals = client.signals("mock", "gpt-4o");
    assert_eq!(signals.rate_limiter.requests_in_window, 1);
    assert_eq!(signals.rate_limiter.tokens_in_window, 10);
    let expected = 7.0 / 1000.0 * 0.005 + 3.0 / 1000.0 * 0.015;
    assert!((signals.usage.total_cost_estimate - expected).abs() < 1e-12);
}

#[tokio::test]
async fn test_admission_estimate_follows_model_family() {
    // 35 chars: 9 tokens at 4 chars/token, 10 at 3.5. Plus 1 + 3 framing.
    let prompt = format!("fail{}", "a".repeat(31));
    let config = CoreConfig::default()
        .with_rate_limits(RateLimitSettings::new().with_default(RateLimits::new(10, 1000)));
    let client = client_with(config, MockAdapter::new());

    // Failed calls keep their estimate, so the window shows what was reserved.
    for model in ["gpt-4o", "claude-3-haiku"] {
        let request = CompletionRequest::new("mock", model).with_prompt(prompt.as_str());
        assert!(client.complete(&request).await.is_err());
    }
    assert_eq!(client.signals("mock", "gpt-4o").rate_limiter.tokens_in_window, 13);
    assert_eq!(
        client.signals("mock", "claude-3-haiku").rate_limiter.tokens_in_window,
        14
    );
}

#[tokio::test]
async fn test_explicit_token_counter_overrides_model_family() {
    let prompt = format!("fail{}", "a".repeat(31));
    let client = LlmClient::builder()
        .with_config(
            CoreConfig::default()
                .with_rate_limits(RateLimitSettings::new().with_default(RateLimits::new(10, 1000))),
        )
        .with_adapter(MockAdapter::new())
        .with_token_counter(Arc::new(CharacterEstimator::new()))
        .build()
        .unwrap();

    let request = CompletionRequest::new("mock", "claude-3-haiku").with_prompt(prompt.as_str());
    assert!(client.complete(&request).await.is_err());
    assert_eq!(
        client.signals("mock", "claude-3-haiku").rate_limiter.tokens_in_window,
        13
    );
}

#[tokio::test]
async fn test_rate_limited_error_is_typed() {
    let adapter = MockAdapter::new();
    let config = CoreConfig::default().with_rate_limits(
        RateLimitSettings::new()
            .with_provider("mock", RateLimits::new(1, 1000))
            .with_max_wait(Duration::from_millis(10)),
    );
    let client = client_with(config, adapter.clone());

    client.complete(&req("one")).await.unwrap();
    match client.complete(&req("two")).await {
        Err(Error::RateLimited { provider, .. }) => assert_eq!(provider, "mock"),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_unknown_provider_is_validation_error() {
    let client = client_with(CoreConfig::default(), MockAdapter::new());
    let r = CompletionRequest::new("nobody", "m").with_prompt("x");
    assert!(matches!(
        client.complete(&r).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());
    let prompts = ["sleep:30", "fail now", "sleep:1", "sleep:15", "plain"];
    let requests: Vec<_> = prompts.iter().map(|p| req(p)).collect();

    let results = client.complete_batch(requests, 3, None).await;

    assert_eq!(results.len(), prompts.len());
    for (p, r) in prompts.iter().zip(&results) {
        if p.contains("fail") {
            assert!(matches!(r, Err(Error::Provider { .. })));
        } else {
            assert_eq!(r.as_ref().unwrap().content, format!("echo: {}", p));
        }
    }
    assert_eq!(adapter.calls(), 5);
}

/// Follows tokio's clock, so paused-time tests drive the limiter windows.
#[derive(Debug)]
struct TokioClock {
    origin: tokio::time::Instant,
}

impl Clock for TokioClock {
    fn now_millis(&self) -> i64 {
        1_700_000_000_000 + self.origin.elapsed().as_millis() as i64
    }
}

/// Records when each model's call reached the provider.
struct TimedAdapter {
    origin: tokio::time::Instant,
    issued: Mutex<Vec<(String, Duration)>>,
}

#[async_trait]
impl ProviderAdapter for TimedAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.issued
            .lock()
            .unwrap()
            .push((request.model.clone(), self.origin.elapsed()));
        Ok(CompletionResponse::new("ok", &request.model).with_usage(1, 1))
    }
}

#[tokio::test(start_paused = true)]
async fn test_throttled_prompt_does_not_hold_up_batch() {
    let origin = tokio::time::Instant::now();
    let adapter = Arc::new(TimedAdapter {
        origin,
        issued: Mutex::new(Vec::new()),
    });
    let config = CoreConfig::default().with_rate_limits(
        RateLimitSettings::new()
            .with_model("mock", "slow-model", RateLimits::new(1, 1000))
            .with_max_wait(Duration::from_secs(120)),
    );
    let client = LlmClient::builder()
        .with_config(config)
        .with_adapter(adapter.clone())
        .with_clock(Arc::new(TokioClock { origin }))
        .build()
        .unwrap();

    let requests = vec![
        CompletionRequest::new("mock", "slow-model").with_prompt("one"),
        CompletionRequest::new("mock", "slow-model").with_prompt("two"),
        CompletionRequest::new("mock", "gpt-4o").with_prompt("three"),
        CompletionRequest::new("mock", "gpt-4o").with_prompt("four"),
    ];
    let results = client.complete_batch(requests, 4, None).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let issued = adapter.issued.lock().unwrap().clone();
    assert_eq!(issued.len(), 4);
    let delayed: Vec<_> = issued
        .iter()
        .filter(|(_, at)| *at >= Duration::from_secs(60))
        .collect();
    assert_eq!(delayed.len(), 1, "issued: {issued:?}");
    assert_eq!(delayed[0].0, "slow-model");
    for (model, at) in issued.iter().filter(|(m, _)| m == "gpt-4o") {
        assert_eq!(*at, Duration::ZERO, "{model} waited behind the throttled prompt");
    }
}

#[tokio::test]
async fn test_sequential_batch_reuses_cache() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());
    let requests = vec![req("same"), req("same"), req("other")];

    let results = client.complete_batch_sequential(requests, None).await;
    let cached: Vec<bool> = results.iter().map(|r| r.as_ref().unwrap().cached).collect();
    assert_eq!(cached, vec![false, true, false]);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_cancelled_batch_issues_nothing_new() {
    let adapter = MockAdapter::new();
    let sink = Arc::new(InMemoryUsageSink::new(100));
    let client = LlmClient::builder()
        .with_adapter(adapter.clone())
        .with_usage_sink(sink.clone())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let requests: Vec<_> = (0..4).map(|i| req(&format!("p{}", i))).collect();
    let results = client.complete_batch(requests, 2, Some(&token)).await;

    assert!(results.iter().all(|r| matches!(r, Err(Error::Cancelled))));
    assert_eq!(adapter.calls(), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_usage_consistent() {
    let adapter = MockAdapter::new();
    let client = client_with(CoreConfig::default(), adapter.clone());
    let token = CancellationToken::new();

    let requests: Vec<_> = (0..6).map(|i| req(&format!("sleep:{}", 20 + i))).collect();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token.cancel();
        })
    };
    let results = client.complete_batch_sequential(requests, Some(&token)).await;
    canceller.await.unwrap();

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let cancelled = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Cancelled)))
        .count();
    assert_eq!(completed + cancelled, 6);
    assert!(cancelled >= 1);
    assert_eq!(adapter.calls(), completed);
    assert_eq!(
        client.usage_snapshot(&UsageScope::Client).unwrap().total_requests,
        completed as u64
    );
}

#[tokio::test]
async fn test_clients_share_sqlite_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings::new()
        .with_sqlite_path(dir.path().join("shared.db"))
        .with_namespace("project");
    assert_eq!(settings.backend, CacheBackendKind::Sqlite);
    let config = CoreConfig::default().with_cache(settings);

    let first_adapter = MockAdapter::new();
    let second_adapter = MockAdapter::new();
    let first = client_with(config.clone(), first_adapter.clone());
    let second = client_with(config, second_adapter.clone());

    first.complete(&req("shared prompt")).await.unwrap();
    let hit = second.complete(&req("shared prompt")).await.unwrap();
    assert!(hit.cached);
    assert_eq!(second_adapter.calls(), 0);
}

#[tokio::test]
async fn test_shared_cache_manager_handle() {
    let cache = Arc::new(CacheManager::from_settings(&CacheSettings::default()).unwrap());
    let a = LlmClient::builder()
        .with_adapter(MockAdapter::new())
        .with_cache(cache.clone())
        .build()
        .unwrap();
    let b_adapter = MockAdapter::new();
    let b = LlmClient::builder()
        .with_adapter(b_adapter.clone())
        .with_cache(cache.clone())
        .build()
        .unwrap();

    a.complete(&req("x")).await.unwrap();
    assert!(b.complete(&req("x")).await.unwrap().cached);
    assert_eq!(b_adapter.calls(), 0);
}

#[test]
fn test_builder_requires_an_adapter() {
    assert!(matches!(
        LlmClient::builder().build(),
        Err(Error::Configuration { .. })
    ));
}
