//! Host selection: picks a remote tool-executor host for a `_run_tool` call,
//! favoring lightly loaded, platform-matching hosts and rotating among ties.
//!
//! Grounded on `examples/original_source/progs/vestaeval/RunToolHost.H`
//! (spec §4.8) for the selection policy, and on `hurry::host`'s
//! platform-detection idiom (`detect_host_libc`/`detect_glibc`) for how a
//! platform string is derived from the running machine when no remote
//! override applies.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Clone, Debug)]
pub struct HostInfo {
    pub name: String,
    pub platform: String,
    pub capacity: u32,
}

struct HostState {
    info: HostInfo,
    load: AtomicU32,
    bad: AtomicBool,
}

pub struct HostSelector {
    hosts: Vec<HostState>,
    rotation: AtomicU32,
}

impl HostSelector {
    pub fn new(hosts: Vec<HostInfo>) -> Self {
        HostSelector {
            hosts: hosts
                .into_iter()
                .map(|info| HostState {
                    info,
                    load: AtomicU32::new(0),
                    bad: AtomicBool::new(false),
                })
                .collect(),
            rotation: AtomicU32::new(0),
        }
    }

    fn is_available(&self, state: &HostState) -> bool {
        !state.bad.load(Ordering::Relaxed) && state.load.load(Ordering::Relaxed) < state.info.capacity
    }

    /// Choose the least-loaded available host matching `platform`, rotating
    /// among hosts tied for lowest load so repeated calls spread work evenly
    /// rather than always hammering the first match. Returns `None` if
    /// every matching host is saturated or marked bad — the caller should
    /// wait and retry (spec §4.8's "saturation waits").
    pub fn select(&self, platform: &str) -> Option<&HostInfo> {
        let candidates: Vec<&HostState> = self
            .hosts
            .iter()
            .filter(|h| h.info.platform == platform && self.is_available(h))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let min_load = candidates
            .iter()
            .map(|h| h.load.load(Ordering::Relaxed))
            .min()
            .unwrap();
        let tied: Vec<&HostState> = candidates
            .into_iter()
            .filter(|h| h.load.load(Ordering::Relaxed) == min_load)
            .collect();
        let index = self.rotation.fetch_add(1, Ordering::Relaxed) as usize % tied.len();
        let chosen = tied[index];
        chosen.load.fetch_add(1, Ordering::Relaxed);
        Some(&chosen.info)
    }

    pub fn release(&self, name: &str) {
        if let Some(state) = self.hosts.iter().find(|h| h.info.name == name) {
            state.load.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Mark a host bad after an RPC failure. The mark is permanent for the
    /// lifetime of this selector (one evaluator process run) — the host is
    /// never selected again, even after the failure that caused it passes.
    pub fn mark_bad(&self, name: &str) {
        if let Some(state) = self.hosts.iter().find(|h| h.info.name == name) {
            state.bad.store(true, Ordering::Relaxed);
        }
    }

    pub fn any_matching(&self, platform: &str) -> bool {
        self.hosts.iter().any(|h| h.info.platform == platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, platform: &str, capacity: u32) -> HostInfo {
        HostInfo {
            name: name.into(),
            platform: platform.into(),
            capacity,
        }
    }

    #[test]
    fn selects_least_loaded_matching_host() {
        let selector = HostSelector::new(vec![
            host("a", "linux", 1),
            host("b", "linux", 2),
            host("c", "darwin", 5),
        ]);
        let chosen = selector.select("linux").unwrap();
        assert_eq!(chosen.platform, "linux");
    }

    #[test]
    fn saturated_hosts_return_none() {
        let selector = HostSelector::new(vec![host("a", "linux", 1)]);
        assert!(selector.select("linux").is_some());
        assert!(selector.select("linux").is_none());
        selector.release("a");
        assert!(selector.select("linux").is_some());
    }

    #[test]
    fn bad_host_stays_excluded_for_the_run() {
        let selector = HostSelector::new(vec![host("a", "linux", 1)]);
        selector.mark_bad("a");
        assert!(selector.select("linux").is_none());
        selector.release("a");
        assert!(selector.select("linux").is_none());
    }

    #[test]
    fn unmatched_platform_is_none() {
        let selector = HostSelector::new(vec![host("a", "linux", 1)]);
        assert!(selector.select("plan9").is_none());
        assert!(!selector.any_matching("plan9"));
    }
}
