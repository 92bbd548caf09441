use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_open: u64,
    pub connections_total: u64,
    pub matches_active: u64,
    pub matches_created: u64,
    pub matches_finished: u64,
    pub actions_accepted: u64,
    pub actions_rejected: u64,
    pub timers_fired: u64,
    pub resyncs: u64,
    pub history_written: u64,
    pub history_dropped: u64,
}

/// Process-wide counters served on `/metrics`.
#[derive(Default)]
pub struct Metrics {
    connections_open: AtomicU64,
    connections_total: AtomicU64,
    matches_active: AtomicU64,
    matches_created: AtomicU64,
    matches_finished: AtomicU64,
    actions_accepted: AtomicU64,
    actions_rejected: AtomicU64,
    timers_fired: AtomicU64,
    resyncs: AtomicU64,
    history_written: AtomicU64,
    history_dropped: AtomicU64,
}

impl Metrics {
    pub fn connection_opened(&self) {
        self.connections_open.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        decrement(&self.connections_open);
    }

    pub fn match_created(&self) {
        self.matches_active.fetch_add(1, Ordering::Relaxed);
        self.matches_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_finished(&self) {
        self.matches_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_dropped(&self) {
        decrement(&self.matches_active);
    }

    pub fn action(&self, accepted: bool) {
        if accepted {
            self.actions_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn timer_fired(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_written(&self) {
        self.history_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_dropped(&self) {
        self.history_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_open: self.connections_open.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            matches_active: self.matches_active.load(Ordering::Relaxed),
            matches_created: self.matches_created.load(Ordering::Relaxed),
            matches_finished: self.matches_finished.load(Ordering::Relaxed),
            actions_accepted: self.actions_accepted.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            history_written: self.history_written.load(Ordering::Relaxed),
            history_dropped: self.history_dropped.load(Ordering::Relaxed),
        }
    }
}

// Gauges saturate at zero.
fn decrement(gauge: &AtomicU64) {
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
        value.checked_sub(1)
    });
}
