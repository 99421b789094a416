//! Destinations for usage events.

use super::tracker::UsageRecord;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub record: UsageRecord,
}

impl UsageEvent {
    pub fn new(timestamp: i64, record: UsageRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            record,
        }
    }
}

/// Durable storage for usage events. Called synchronously from `record`.
pub trait UsageSink: Send + Sync {
    fn persist(&self, event: &UsageEvent) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Drops everything.
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn persist(&self, _event: &UsageEvent) -> Result<()> {
        Ok(())
    }
}

/// Keeps the most recent `max_events` events.
pub struct InMemoryUsageSink {
    events: RwLock<VecDeque<UsageEvent>>,
    max_events: usize,
}

impl InMemoryUsageSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max.max(1),
        }
    }
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }
    pub fn clear(&self) {
        self.events.write().unwrap_or_else(|p| p.into_inner()).clear();
    }
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|p| p.into_inner()).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UsageSink for InMemoryUsageSink {
    fn persist(&self, event: &UsageEvent) -> Result<()> {
        let mut events = self.events.write().unwrap_or_else(|p| p.into_inner());
        events.push_back(event.clone());
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(())
    }
}

/// Fans out to several sinks; one failing sink does not stop the others.
#[derive(Default)]
pub struct CompositeUsageSink {
    sinks: Vec<Arc<dyn UsageSink>>,
}

impl CompositeUsageSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl UsageSink for CompositeUsageSink {
    fn persist(&self, event: &UsageEvent) -> Result<()> {
        let mut first_err = None;
        for s in &self.sinks {
            if let Err(e) = s.persist(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<()> {
        for s in &self.sinks {
            s.flush()?;
        }
        Ok(())
    }
}
