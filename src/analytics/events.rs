use serde::Serialize;
use std::collections::VecDeque;

use super::timeline::MultimodalSample;

pub const DEFAULT_EVENT_CAPACITY: usize = 200;
pub const DEFAULT_SYNC_DELAY_MS: u64 = 500;

/// FIFO audit log of timeline samples.
#[derive(Clone, Debug, Serialize)]
pub struct EventLog {
    events: VecDeque<MultimodalSample>,
    #[serde(skip)]
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, event: MultimodalSample) {
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &MultimodalSample> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Trailing debounce in front of an [`EventLog`].
///
/// Only the latest sample of a burst reaches the log: a pending sample is
/// replaced by newer ones until it has waited at least `delay_ms`.
#[derive(Clone, Debug)]
pub struct AuditSync {
    delay_ms: u64,
    pending: Option<(u64, MultimodalSample)>,
}

impl Default for AuditSync {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_DELAY_MS)
    }
}

impl AuditSync {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            pending: None,
        }
    }

    /// Offer the latest sample at time `now_ms`. Returns true when a
    /// previously pending sample was committed.
    pub fn offer(&mut self, sample: MultimodalSample, now_ms: u64, sink: &mut EventLog) -> bool {
        let committed = match self.pending.take() {
            Some((since, prev)) if now_ms.saturating_sub(since) >= self.delay_ms => {
                sink.record(prev);
                true
            }
            Some(_) => {
                log::trace!("Debounced audit sample superseded at {}ms", now_ms);
                false
            }
            None => false,
        };
        self.pending = Some((now_ms, sample));
        committed
    }

    /// Commit whatever is pending, e.g. at shutdown.
    pub fn flush(&mut self, sink: &mut EventLog) -> bool {
        match self.pending.take() {
            Some((_, sample)) => {
                sink.record(sample);
                true
            }
            None => false,
        }
    }
}
