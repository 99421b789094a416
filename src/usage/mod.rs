//! Usage accounting.
//!
//! Every completed call (including cache hits) produces one [`UsageRecord`].
//! The [`UsageTracker`] folds it into three scopes at once:
//!
//! | Scope | Lifetime |
//! |-------|----------|
//! | [`UsageScope::Process`] | A [`UsageLedger`] shared explicitly between clients |
//! | [`UsageScope::Client`] | One tracker |
//! | [`UsageScope::Namespace`] | Per cache namespace, within one tracker |
//!
//! Durable storage is left to an injected [`UsageSink`].

mod sink;
mod tracker;

pub use sink::{CompositeUsageSink, InMemoryUsageSink, NoopUsageSink, UsageEvent, UsageSink};
pub use tracker::{ModelUsage, UsageLedger, UsageRecord, UsageScope, UsageStats, UsageTracker};
