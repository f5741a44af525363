//! Injected metrics collection.
//!
//! The registry is handed to components at construction rather than living in
//! a process-wide singleton, so embedders decide how (and whether) to scrape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Clonable handle over a set of atomic counter and gauge cells.
#[derive(Debug, Clone, Default)]
pub struct SharedMetricsRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    gauges: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, u64>,
}

impl SharedMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: impl Into<String>, delta: u64) -> u64 {
        let cell = cell_for(&self.inner.counters, name.into());
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(delta);
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn set_gauge(&self, name: impl Into<String>, value: u64) {
        cell_for(&self.inner.gauges, name.into()).store(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: snapshot_cells(&self.inner.counters),
            gauges: snapshot_cells(&self.inner.gauges),
        }
    }
}

fn cell_for(cells: &Mutex<HashMap<String, Arc<AtomicU64>>>, name: String) -> Arc<AtomicU64> {
    let mut cells = match cells.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    Arc::clone(cells.entry(name).or_default())
}

fn snapshot_cells(cells: &Mutex<HashMap<String, Arc<AtomicU64>>>) -> HashMap<String, u64> {
    let cells = match cells.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cells
        .iter()
        .map(|(name, cell)| (name.clone(), cell.load(Ordering::Relaxed)))
        .collect()
}

/// Formats a metric name with a single label, e.g.
/// `local_wal_size{path="/var/lib/ferry/wal"}`.
pub fn labeled(name: &str, label: &str, value: &str) -> String {
    format!("{name}{{{label}=\"{value}\"}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_gauges_overwrite() {
        let registry = SharedMetricsRegistry::new();
        assert_eq!(registry.inc_counter("drained", 2), 2);
        assert_eq!(registry.inc_counter("drained", 3), 5);
        registry.set_gauge("size", 7);
        registry.set_gauge("size", 4);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counters.get("drained"), Some(&5));
        assert_eq!(snapshot.gauges.get("size"), Some(&4));
    }

    #[test]
    fn clones_share_cells() {
        let registry = SharedMetricsRegistry::new();
        let clone = registry.clone();
        clone.set_gauge("size", 11);
        assert_eq!(registry.snapshot().gauges.get("size"), Some(&11));
    }

    #[test]
    fn labeled_formats_prometheus_style() {
        assert_eq!(labeled("wal_size", "path", "/tmp/w"), "wal_size{path=\"/tmp/w\"}");
    }
}
