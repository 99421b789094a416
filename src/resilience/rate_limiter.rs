use crate::clock::{system_clock, SharedClock};
use crate::config::{RateLimitSettings, RateLimits};
use crate::{Error, ErrorContext, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 86_400_000;

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Budget recorded; the call may go ahead.
    Proceed(Reservation),
    /// Over budget, but the window drains within the caller's max wait.
    /// Nothing was recorded; ask again after sleeping.
    Wait(Duration),
    /// Over budget for longer than the caller is willing to wait.
    Reject { retry_after: Duration },
}

/// Handle for one admitted request, used to reconcile its token estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub provider: String,
    pub model: String,
    pub estimated_tokens: u64,
    /// 0 when the key is unthrottled and nothing was recorded.
    id: u64,
}

impl Reservation {
    pub fn is_tracked(&self) -> bool {
        self.id != 0
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub provider: String,
    pub model: String,
    pub limits: Option<RateLimits>,
    pub requests_in_window: u64,
    pub tokens_in_window: u64,
    pub tokens_today: u64,
    /// Estimated wait (ms) before one more zero-token request would be admitted.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct WindowEntry {
    id: u64,
    at: i64,
    tokens: u64,
}

#[derive(Debug)]
struct Window {
    span_ms: i64,
    entries: VecDeque<WindowEntry>,
    tokens: u64,
}

impl Window {
    fn new(span_ms: i64) -> Self {
        Self {
            span_ms,
            entries: VecDeque::new(),
            tokens: 0,
        }
    }

    fn prune(&mut self, now: i64) {
        while let Some(front) = self.entries.front() {
            if front.at + self.span_ms > now {
                break;
            }
            self.tokens = self.tokens.saturating_sub(front.tokens);
            self.entries.pop_front();
        }
    }

    fn push(&mut self, entry: WindowEntry) {
        self.tokens = self.tokens.saturating_add(entry.tokens);
        self.entries.push_back(entry);
    }

    /// Time until the `n`-th oldest entry (1-based) leaves the window.
    fn wait_for_entries(&self, n: usize, now: i64) -> i64 {
        match self.entries.get(n.saturating_sub(1)) {
            Some(e) => (e.at + self.span_ms - now).max(1),
            None => 0,
        }
    }

    /// Time until enough of the oldest entries leave to free `needed` tokens.
    fn wait_for_tokens(&self, needed: u64, now: i64) -> i64 {
        let mut freed = 0u64;
        for e in &self.entries {
            freed = freed.saturating_add(e.tokens);
            if freed >= needed {
                return (e.at + self.span_ms - now).max(1);
            }
        }
        // Only reachable if `needed` exceeds everything recorded, which the
        // caller rules out by rejecting estimates larger than the limit.
        self.span_ms
    }

    fn set_tokens(&mut self, id: u64, tokens: u64) -> bool {
        match self.entries.iter_mut().rev().find(|e| e.id == id) {
            Some(e) => {
                self.tokens = self.tokens.saturating_sub(e.tokens).saturating_add(tokens);
                e.tokens = tokens;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct KeyState {
    limits: RateLimits,
    minute: Window,
    day: Window,
}

impl KeyState {
    fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            minute: Window::new(MINUTE_MS),
            day: Window::new(DAY_MS),
        }
    }

    fn prune(&mut self, now: i64) {
        self.minute.prune(now);
        self.day.prune(now);
    }

    /// Milliseconds until `estimated` more tokens and one more request fit; 0 if they fit now.
    fn required_wait(&self, estimated: u64, now: i64) -> i64 {
        let rpm = self.limits.requests_per_minute;
        let tpm = self.limits.tokens_per_minute;
        let tpd = self.limits.effective_tokens_per_day();
        let mut wait = 0i64;

        let requests = self.minute.entries.len() as u64;
        if requests + 1 > rpm {
            let excess = (requests + 1 - rpm) as usize;
            wait = wait.max(self.minute.wait_for_entries(excess, now));
        }
        let minute_total = self.minute.tokens.saturating_add(estimated);
        if minute_total > tpm {
            let needed = minute_total - tpm;
            wait = wait.max(self.minute.wait_for_tokens(needed, now));
        }
        let day_total = self.day.tokens.saturating_add(estimated);
        if day_total > tpd {
            let needed = day_total - tpd;
            wait = wait.max(self.day.wait_for_tokens(needed, now));
        }
        wait
    }
}

#[derive(Debug)]
struct State {
    keys: HashMap<(String, String), KeyState>,
    next_id: u64,
}

/// Sliding-window limiter keyed by provider and model.
///
/// - Per key: requests and tokens over the last 60 s, tokens over the last 24 h
/// - Keys without configured limits are never throttled
/// - No ordering between concurrent callers beyond who takes the lock first
pub struct RateLimiter {
    settings: RateLimitSettings,
    clock: SharedClock,
    state: Mutex<State>,
}

impl RateLimiter {
    /// Validates every configured budget up front.
    pub fn new(settings: RateLimitSettings) -> Result<Self> {
        Self::with_clock(settings, system_clock())
    }

    pub fn with_clock(settings: RateLimitSettings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            clock,
            state: Mutex::new(State {
                keys: HashMap::new(),
                next_id: 1,
            }),
        })
    }

    /// A limiter that admits everything.
    pub fn unlimited() -> Self {
        Self {
            settings: RateLimitSettings::default(),
            clock: system_clock(),
            state: Mutex::new(State {
                keys: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn max_wait(&self) -> Duration {
        self.settings.max_wait()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| {
            Error::runtime_with_context(
                "RateLimiter poisoned",
                ErrorContext::new().with_source("rate_limiter"),
            )
        })
    }

    /// Admission check. Records the request on `Proceed`; records nothing otherwise.
    pub fn acquire(&self, provider: &str, model: &str, estimated_tokens: u64) -> Result<Admission> {
        let Some(limits) = self.settings.limits_for(provider, model) else {
            return Ok(Admission::Proceed(Reservation {
                provider: provider.to_string(),
                model: model.to_string(),
                estimated_tokens,
                id: 0,
            }));
        };
        if estimated_tokens > limits.tokens_per_minute
            || estimated_tokens > limits.effective_tokens_per_day()
        {
            return Err(Error::validation_with_context(
                "estimated tokens exceed the configured budget",
                ErrorContext::new()
                    .with_details(format!(
                        "{}/{}: estimate {} > limit {}",
                        provider,
                        model,
                        estimated_tokens,
                        limits.tokens_per_minute.min(limits.effective_tokens_per_day())
                    ))
                    .with_source("rate_limiter"),
            ));
        }

        let now = self.clock.now_millis();
        let mut st = self.lock()?;
        let id = st.next_id;
        let key = (provider.to_string(), model.to_string());
        let ks = st
            .keys
            .entry(key)
            .or_insert_with(|| KeyState::new(limits));
        ks.prune(now);

        let wait_ms = ks.required_wait(estimated_tokens, now);
        if wait_ms > 0 {
            let wait = Duration::from_millis(wait_ms as u64);
            debug!(provider, model, wait_ms, "rate limit window full");
            return Ok(if wait > self.settings.max_wait() {
                Admission::Reject { retry_after: wait }
            } else {
                Admission::Wait(wait)
            });
        }

        let entry = WindowEntry {
            id,
            at: now,
            tokens: estimated_tokens,
        };
        ks.minute.push(entry.clone());
        ks.day.push(entry);
        st.next_id += 1;
        Ok(Admission::Proceed(Reservation {
            provider: provider.to_string(),
            model: model.to_string(),
            estimated_tokens,
            id,
        }))
    }

    /// Replace a reservation's estimate with the provider-reported usage.
    pub fn report_actual(&self, reservation: &Reservation, actual_tokens: u64) -> Result<()> {
        if !reservation.is_tracked() {
            return Ok(());
        }
        let mut st = self.lock()?;
        let key = (reservation.provider.clone(), reservation.model.clone());
        if let Some(ks) = st.keys.get_mut(&key) {
            let in_minute = ks.minute.set_tokens(reservation.id, actual_tokens);
            let in_day = ks.day.set_tokens(reservation.id, actual_tokens);
            debug!(
                provider = %reservation.provider,
                model = %reservation.model,
                estimated = reservation.estimated_tokens,
                actual = actual_tokens,
                in_minute,
                in_day,
                "reconciled token usage"
            );
        }
        Ok(())
    }

    /// Blocking acquire: sleeps the current thread on `Wait`.
    ///
    /// Fails with [`Error::RateLimited`] on `Reject`, or once total sleeping
    /// would exceed the configured max wait.
    pub fn acquire_blocking(
        &self,
        provider: &str,
        model: &str,
        estimated_tokens: u64,
    ) -> Result<Reservation> {
        let mut waited = Duration::ZERO;
        loop {
            match self.acquire(provider, model, estimated_tokens)? {
                Admission::Proceed(r) => return Ok(r),
                Admission::Wait(d) => {
                    self.check_budget(provider, model, waited, d)?;
                    std::thread::sleep(d);
                    waited += d;
                }
                Admission::Reject { retry_after } => {
                    return Err(rate_limited(provider, model, retry_after))
                }
            }
        }
    }

    /// Async acquire: suspends the task on `Wait` without blocking the runtime.
    pub async fn acquire_async(
        &self,
        provider: &str,
        model: &str,
        estimated_tokens: u64,
    ) -> Result<Reservation> {
        let mut waited = Duration::ZERO;
        loop {
            match self.acquire(provider, model, estimated_tokens)? {
                Admission::Proceed(r) => return Ok(r),
                Admission::Wait(d) => {
                    self.check_budget(provider, model, waited, d)?;
                    tokio::time::sleep(d).await;
                    waited += d;
                }
                Admission::Reject { retry_after } => {
                    return Err(rate_limited(provider, model, retry_after))
                }
            }
        }
    }

    fn check_budget(&self, provider: &str, model: &str, waited: Duration, next: Duration) -> Result<()> {
        if waited + next > self.settings.max_wait() {
            return Err(rate_limited(provider, model, next));
        }
        Ok(())
    }

    pub fn snapshot(&self, provider: &str, model: &str) -> RateLimiterSnapshot {
        let limits = self.settings.limits_for(provider, model);
        let now = self.clock.now_millis();
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let mut snap = RateLimiterSnapshot {
            provider: provider.to_string(),
            model: model.to_string(),
            limits,
            requests_in_window: 0,
            tokens_in_window: 0,
            tokens_today: 0,
            estimated_wait_ms: None,
        };
        if let Some(ks) = st.keys.get_mut(&(provider.to_string(), model.to_string())) {
            ks.prune(now);
            snap.requests_in_window = ks.minute.entries.len() as u64;
            snap.tokens_in_window = ks.minute.tokens;
            snap.tokens_today = ks.day.tokens;
            let wait = ks.required_wait(0, now);
            if wait > 0 {
                snap.estimated_wait_ms = Some(wait as u64);
            }
        }
        snap
    }
}

fn rate_limited(provider: &str, model: &str, retry_after: Duration) -> Error {
    Error::RateLimited {
        provider: provider.to_string(),
        model: model.to_string(),
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn limiter(limits: RateLimits, max_wait: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let settings = RateLimitSettings::new()
            .with_default(limits)
            .with_max_wait(max_wait);
        (RateLimiter::with_clock(settings, clock.clone()).unwrap(), clock)
    }

    fn proceed(a: Admission) -> Reservation {
        match a {
            Admission::Proceed(r) => r,
            other => panic!("expected proceed, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let settings = RateLimitSettings::new().with_default(RateLimits::new(10, 50));
        assert!(matches!(
            RateLimiter::new(settings),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_rpm_budget_third_call_waits() {
        let (rl, clock) = limiter(RateLimits::new(2, 1000), Duration::from_secs(120));
        proceed(rl.acquire("openai", "gpt-4o", 1).unwrap());
        clock.advance(Duration::from_millis(300));
        proceed(rl.acquire("openai", "gpt-4o", 1).unwrap());
        clock.advance(Duration::from_millis(300));
        match rl.acquire("openai", "gpt-4o", 1).unwrap() {
            Admission::Wait(d) => assert_eq!(d, Duration::from_millis(60_000 - 600)),
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_rpm_budget_rejects_beyond_max_wait() {
        let (rl, _) = limiter(RateLimits::new(2, 1000), Duration::from_secs(1));
        proceed(rl.acquire("openai", "gpt-4o", 1).unwrap());
        proceed(rl.acquire("openai", "gpt-4o", 1).unwrap());
        assert!(matches!(
            rl.acquire("openai", "gpt-4o", 1).unwrap(),
            Admission::Reject { .. }
        ));
    }

    #[test]
    fn test_window_drains() {
        let (rl, clock) = limiter(RateLimits::new(1, 100), Duration::from_secs(120));
        proceed(rl.acquire("p", "m", 5).unwrap());
        assert!(matches!(rl.acquire("p", "m", 5).unwrap(), Admission::Wait(_)));
        clock.advance(Duration::from_secs(60));
        proceed(rl.acquire("p", "m", 5).unwrap());
    }

    #[test]
    fn test_token_budget_waits_for_oldest_entries() {
        let (rl, clock) = limiter(RateLimits::new(10, 100), Duration::from_secs(120));
        proceed(rl.acquire("p", "m", 40).unwrap());
        clock.advance(Duration::from_secs(10));
        proceed(rl.acquire("p", "m", 40).unwrap());
        clock.advance(Duration::from_secs(10));
        // 80 used; 30 more needs the first entry (t=0) to leave at t=60.
        match rl.acquire("p", "m", 30).unwrap() {
            Admission::Wait(d) => assert_eq!(d, Duration::from_secs(40)),
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_daily_budget() {
        let limits = RateLimits::new(10, 100).with_tokens_per_day(150);
        let (rl, clock) = limiter(limits, Duration::from_secs(120));
        proceed(rl.acquire("p", "m", 100).unwrap());
        clock.advance(Duration::from_secs(61));
        match rl.acquire("p", "m", 100).unwrap() {
            Admission::Reject { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis((DAY_MS - 61_000) as u64))
            }
            other => panic!("expected reject, got {other:?}"),
        }
        proceed(rl.acquire("p", "m", 50).unwrap());
    }

    #[test]
    fn test_estimate_larger_than_budget_is_error() {
        let (rl, _) = limiter(RateLimits::new(1, 100), Duration::from_secs(1));
        assert!(matches!(
            rl.acquire("p", "m", 101),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_report_actual_adjusts_tokens() {
        let (rl, _) = limiter(RateLimits::new(10, 100), Duration::from_secs(120));
        let r = proceed(rl.acquire("p", "m", 80).unwrap());
        assert!(matches!(rl.acquire("p", "m", 30).unwrap(), Admission::Wait(_)));

        rl.report_actual(&r, 20).unwrap();
        let snap = rl.snapshot("p", "m");
        assert_eq!(snap.tokens_in_window, 20);
        assert_eq!(snap.tokens_today, 20);
        proceed(rl.acquire("p", "m", 30).unwrap());

        rl.report_actual(&r, 0).unwrap();
        assert_eq!(rl.snapshot("p", "m").tokens_in_window, 30);
    }

    #[test]
    fn test_keys_are_independent() {
        let (rl, _) = limiter(RateLimits::new(1, 100), Duration::from_secs(120));
        proceed(rl.acquire("p", "a", 1).unwrap());
        proceed(rl.acquire("p", "b", 1).unwrap());
        proceed(rl.acquire("q", "a", 1).unwrap());
    }

    #[test]
    fn test_unconfigured_key_is_unthrottled() {
        let rl = RateLimiter::unlimited();
        for _ in 0..100 {
            let r = proceed(rl.acquire("p", "m", 1_000_000).unwrap());
            assert!(!r.is_tracked());
            rl.report_actual(&r, 5).unwrap();
        }
        assert_eq!(rl.snapshot("p", "m").requests_in_window, 0);
    }

    #[test]
    fn test_snapshot_reports_wait() {
        let (rl, _) = limiter(RateLimits::new(1, 100), Duration::from_secs(120));
        assert!(rl.snapshot("p", "m").estimated_wait_ms.is_none());
        proceed(rl.acquire("p", "m", 10).unwrap());
        let snap = rl.snapshot("p", "m");
        assert_eq!(snap.requests_in_window, 1);
        assert_eq!(snap.estimated_wait_ms, Some(60_000));
    }

    #[test]
    fn test_acquire_blocking_rejects_with_typed_error() {
        let (rl, _) = limiter(RateLimits::new(1, 100), Duration::from_millis(10));
        rl.acquire_blocking("p", "m", 1).unwrap();
        let err = rl.acquire_blocking("p", "m", 1).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        assert!(err.retry_after().unwrap() > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_acquire_async_rejects_with_typed_error() {
        let (rl, _) = limiter(RateLimits::new(1, 100), Duration::from_millis(10));
        rl.acquire_async("p", "m", 1).await.unwrap();
        let err = rl.acquire_async("p", "m", 1).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[test]
    fn test_oversized_actual_saturates() {
        let (rl, clock) = limiter(RateLimits::new(10, 100), Duration::from_secs(120));
        let r = proceed(rl.acquire("p", "m", 10).unwrap());
        rl.report_actual(&r, u64::MAX).unwrap();
        rl.report_actual(&r, u64::MAX).unwrap();
        let snap = rl.snapshot("p", "m");
        assert_eq!(snap.tokens_in_window, u64::MAX);
        assert_eq!(snap.tokens_today, u64::MAX);
        assert!(!matches!(rl.acquire("p", "m", 1).unwrap(), Admission::Proceed(_)));

        clock.advance(Duration::from_millis(DAY_MS as u64));
        assert_eq!(rl.snapshot("p", "m").tokens_today, 0);
        proceed(rl.acquire("p", "m", 1).unwrap());
    }

    /// Follows tokio's clock, so paused-time tests drive the windows too.
    #[derive(Debug)]
    struct TokioClock {
        origin: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now_millis(&self) -> i64 {
            1_700_000_000_000 + self.origin.elapsed().as_millis() as i64
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_async_sleeps_then_proceeds() {
        let clock = Arc::new(TokioClock {
            origin: tokio::time::Instant::now(),
        });
        let settings = RateLimitSettings::new()
            .with_default(RateLimits::new(1, 100))
            .with_max_wait(Duration::from_secs(120));
        let rl = RateLimiter::with_clock(settings, clock).unwrap();

        rl.acquire_async("p", "m", 1).await.unwrap();
        let start = tokio::time::Instant::now();
        let second = rl.acquire_async("p", "m", 1).await.unwrap();
        let waited = start.elapsed();

        assert!(second.is_tracked());
        assert!(waited >= Duration::from_secs(60), "waited {waited:?}");
        assert!(waited < Duration::from_secs(61), "waited {waited:?}");
        assert_eq!(rl.snapshot("p", "m").requests_in_window, 1);
    }

    #[test]
    fn test_acquire_blocking_records_on_proceed() {
        let (rl, _) = limiter(RateLimits::new(2, 100), Duration::from_secs(1));
        let r = rl.acquire_blocking("p", "m", 10).unwrap();
        assert!(r.is_tracked());
        assert_eq!(rl.snapshot("p", "m").requests_in_window, 1);
    }
}
