//! Per-apply-kind call/hit/miss/elapsed-RPC-time counters for the CLI's
//! `-cstats`/`-mstats` flags.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Timing.C`'s
//! counters: calls, hits, misses, elapsed cache-RPC time, kept per
//! apply-kind (`source_label` — "model", "run_tool", ...).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LabelStats {
    pub calls: u64,
    pub hits: u64,
    pub misses: u64,
    pub rpc_time: Duration,
}

impl LabelStats {
    fn combine(self, other: LabelStats) -> LabelStats {
        LabelStats {
            calls: self.calls + other.calls,
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            rpc_time: self.rpc_time + other.rpc_time,
        }
    }
}

#[derive(Default)]
pub struct CacheStats {
    by_label: Mutex<HashMap<String, LabelStats>>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, label: &str) {
        self.by_label
            .lock()
            .unwrap()
            .entry(label.to_string())
            .or_default()
            .calls += 1;
    }

    pub fn record_hit(&self, label: &str, rpc_time: Duration) {
        let mut guard = self.by_label.lock().unwrap();
        let entry = guard.entry(label.to_string()).or_default();
        entry.hits += 1;
        entry.rpc_time += rpc_time;
    }

    pub fn record_miss(&self, label: &str, rpc_time: Duration) {
        let mut guard = self.by_label.lock().unwrap();
        let entry = guard.entry(label.to_string()).or_default();
        entry.misses += 1;
        entry.rpc_time += rpc_time;
    }

    pub fn snapshot(&self, label: &str) -> LabelStats {
        self.by_label
            .lock()
            .unwrap()
            .get(label)
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self) -> LabelStats {
        self.by_label
            .lock()
            .unwrap()
            .values()
            .fold(LabelStats::default(), |acc, s| acc.combine(*s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_hits_misses_accumulate_per_label() {
        let stats = CacheStats::new();
        stats.record_call("model");
        stats.record_call("model");
        stats.record_hit("model", Duration::from_millis(1));
        stats.record_call("run_tool");
        stats.record_miss("run_tool", Duration::from_millis(2));

        let model = stats.snapshot("model");
        assert_eq!(model.calls, 2);
        assert_eq!(model.hits, 1);
        assert_eq!(model.misses, 0);

        let total = stats.total();
        assert_eq!(total.calls, 3);
        assert_eq!(total.hits, 1);
        assert_eq!(total.misses, 1);
    }
}
