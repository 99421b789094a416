//! Admission control for outbound provider calls.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Sliding-window request/token budgets per provider and model |
//!
//! ```rust
//! use llm_guard_core::config::{RateLimitSettings, RateLimits};
//! use llm_guard_core::resilience::{Admission, RateLimiter};
//!
//! let settings = RateLimitSettings::new().with_provider("openai", RateLimits::new(60, 90_000));
//! let limiter = RateLimiter::new(settings).unwrap();
//!
//! match limiter.acquire("openai", "gpt-4o", 500).unwrap() {
//!     Admission::Proceed(reservation) => {
//!         // call the provider, then reconcile with the real usage
//!         limiter.report_actual(&reservation, 420).unwrap();
//!     }
//!     Admission::Wait(d) => println!("retry in {:?}", d),
//!     Admission::Reject { retry_after } => println!("over budget for {:?}", retry_after),
//! }
//! ```

pub mod rate_limiter;

pub use rate_limiter::{Admission, RateLimiter, RateLimiterSnapshot, Reservation};
