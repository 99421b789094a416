use llm_guard_core::usage::{
    CompositeUsageSink, InMemoryUsageSink, UsageLedger, UsageRecord, UsageScope, UsageTracker,
};
use llm_guard_core::Error;
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_recording_is_exact() {
    let tracker = Arc::new(UsageTracker::new());
    let (n, t) = (16u64, 250u64);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for _ in 0..t {
                    tracker.record(
                        UsageRecord::new("openai", "gpt-4o")
                            .with_namespace(if i % 2 == 0 { "even" } else { "odd" })
                            .with_tokens(1, 0),
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let client = tracker.snapshot(&UsageScope::Client).unwrap();
    assert_eq!(client.total_tokens, n * t);
    assert_eq!(client.by_model["openai/gpt-4o"].requests, n * t);
    let even = tracker.snapshot(&UsageScope::Namespace("even".into())).unwrap();
    let odd = tracker.snapshot(&UsageScope::Namespace("odd".into())).unwrap();
    assert_eq!(even.total_tokens + odd.total_tokens, n * t);
    assert_eq!(tracker.namespaces(), vec!["even".to_string(), "odd".to_string()]);
}

#[test]
fn test_process_scope_spans_clients() {
    let ledger = UsageLedger::shared();
    let a = UsageTracker::with_process_ledger(ledger.clone());
    let b = UsageTracker::with_process_ledger(ledger.clone());
    a.record(UsageRecord::new("openai", "gpt-4o").with_tokens(10, 5).with_cost(0.1));
    b.record(UsageRecord::new("groq", "llama").with_tokens(1, 1).with_cache_hit(true));

    let process = a.snapshot(&UsageScope::Process).unwrap();
    assert_eq!(process.total_requests, 2);
    assert_eq!(process.cache_hits, 1);
    assert_eq!(process.by_model.len(), 2);
    assert!((process.cache_hit_ratio() - 0.5).abs() < 1e-9);

    b.reset(&UsageScope::Process).unwrap();
    assert_eq!(a.snapshot(&UsageScope::Process).unwrap().total_requests, 0);
    assert_eq!(a.snapshot(&UsageScope::Client).unwrap().total_requests, 1);
}

#[test]
fn test_unknown_namespace_is_empty_and_empty_name_is_rejected() {
    let tracker = UsageTracker::new();
    let s = tracker.snapshot(&UsageScope::Namespace("never-used".into())).unwrap();
    assert_eq!(s.total_requests, 0);
    assert!(matches!(
        tracker.snapshot(&UsageScope::Namespace(String::new())),
        Err(Error::Validation { .. })
    ));
}

#[test]
fn test_events_fan_out_to_sinks() {
    let first = Arc::new(InMemoryUsageSink::new(100));
    let second = Arc::new(InMemoryUsageSink::new(100));
    let tracker = UsageTracker::new().with_sink(Arc::new(
        CompositeUsageSink::new()
            .add_sink(first.clone())
            .add_sink(second.clone()),
    ));
    tracker.record(UsageRecord::new("openai", "gpt-4o").with_tokens(2, 3));
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first.events()[0].record.total_tokens(), 5);
    assert_ne!(first.events()[0].id, "");
}
