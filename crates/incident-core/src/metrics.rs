//! Hand-rolled Prometheus text-exposition metrics registry.
//!
//! None of this workspace's dependency tree pulls in a metrics crate, so
//! (matching how the rest of the codebase favors direct, explicit
//! implementations over an extra dependency for small surfaces) counters,
//! gauges, and histograms are plain atomics behind a `parking_lot::RwLock`
//! label index, rendered as `# HELP` / `# TYPE` / value lines on `/metrics`.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

type LabelSet = Vec<(&'static str, String)>;

fn render_labels(labels: &LabelSet) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", parts.join(","))
}

struct CounterFamily {
    help: &'static str,
    values: RwLock<BTreeMap<LabelSet, AtomicU64>>,
}

struct GaugeFamily {
    help: &'static str,
    values: RwLock<BTreeMap<LabelSet, AtomicI64>>,
}

struct HistogramFamily {
    help: &'static str,
    buckets: Vec<f64>,
    values: RwLock<BTreeMap<LabelSet, HistogramState>>,
}

struct HistogramState {
    bucket_counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl HistogramState {
    fn new(num_buckets: usize) -> Self {
        Self {
            bucket_counts: (0..=num_buckets).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

/// Process-wide metrics registry. Each service constructs one with the
/// metric families it needs and stores it in `Arc` alongside its other
/// shared state.
pub struct Registry {
    counters: RwLock<BTreeMap<&'static str, CounterFamily>>,
    gauges: RwLock<BTreeMap<&'static str, GaugeFamily>>,
    histograms: RwLock<BTreeMap<&'static str, HistogramFamily>>,
}

/// Default histogram bucket boundaries, in seconds, for latency-shaped data.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Registry {
    /// Metric names must match spec's literal Prometheus names exactly —
    /// no per-service prefix is added, since `/metrics` on each service
    /// exposes a distinct set of families anyway.
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register_counter(&self, name: &'static str, help: &'static str) {
        self.counters
            .write()
            .entry(name)
            .or_insert_with(|| CounterFamily {
                help,
                values: RwLock::new(BTreeMap::new()),
            });
    }

    pub fn register_gauge(&self, name: &'static str, help: &'static str) {
        self.gauges
            .write()
            .entry(name)
            .or_insert_with(|| GaugeFamily {
                help,
                values: RwLock::new(BTreeMap::new()),
            });
    }

    pub fn register_histogram(&self, name: &'static str, help: &'static str, buckets: &[f64]) {
        self.histograms
            .write()
            .entry(name)
            .or_insert_with(|| HistogramFamily {
                help,
                buckets: buckets.to_vec(),
                values: RwLock::new(BTreeMap::new()),
            });
    }

    pub fn incr_counter(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        let families = self.counters.read();
        let Some(family) = families.get(name) else {
            tracing::warn!(metric = name, "incrementing unregistered counter");
            return;
        };
        let key = owned_labels(labels);
        let values = family.values.upgradable_read();
        if let Some(counter) = values.get(&key) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            let mut values = parking_lot::RwLockUpgradableReadGuard::upgrade(values);
            values
                .entry(key)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_gauge(&self, name: &'static str, labels: &[(&'static str, &str)], value: i64) {
        let families = self.gauges.read();
        let Some(family) = families.get(name) else {
            tracing::warn!(metric = name, "setting unregistered gauge");
            return;
        };
        let key = owned_labels(labels);
        let values = family.values.upgradable_read();
        if let Some(gauge) = values.get(&key) {
            gauge.store(value, Ordering::Relaxed);
        } else {
            let mut values = parking_lot::RwLockUpgradableReadGuard::upgrade(values);
            values.insert(key, AtomicI64::new(value));
        }
    }

    pub fn inc_gauge(&self, name: &'static str, labels: &[(&'static str, &str)], delta: i64) {
        let families = self.gauges.read();
        let Some(family) = families.get(name) else {
            tracing::warn!(metric = name, "adjusting unregistered gauge");
            return;
        };
        let key = owned_labels(labels);
        let values = family.values.upgradable_read();
        if let Some(gauge) = values.get(&key) {
            gauge.fetch_add(delta, Ordering::Relaxed);
        } else {
            let mut values = parking_lot::RwLockUpgradableReadGuard::upgrade(values);
            values
                .entry(key)
                .or_insert_with(|| AtomicI64::new(0))
                .fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn observe_histogram(
        &self,
        name: &'static str,
        labels: &[(&'static str, &str)],
        value_seconds: f64,
    ) {
        let families = self.histograms.read();
        let Some(family) = families.get(name) else {
            tracing::warn!(metric = name, "observing unregistered histogram");
            return;
        };
        let key = owned_labels(labels);
        let values = family.values.upgradable_read();
        let state_exists = values.contains_key(&key);
        let num_buckets = family.buckets.len();
        if !state_exists {
            let mut values = parking_lot::RwLockUpgradableReadGuard::upgrade(values);
            values
                .entry(key.clone())
                .or_insert_with(|| HistogramState::new(num_buckets));
        }
        let values = family.values.read();
        let state = values.get(&key).expect("just inserted");
        for (i, bound) in family.buckets.iter().enumerate() {
            if value_seconds <= *bound {
                state.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        state.bucket_counts[num_buckets].fetch_add(1, Ordering::Relaxed); // +Inf
        state.count.fetch_add(1, Ordering::Relaxed);
        state
            .sum_micros
            .fetch_add((value_seconds * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }

    /// Render the full registry as Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (name, family) in self.counters.read().iter() {
            out.push_str(&format!("# HELP {name} {}\n", family.help));
            out.push_str(&format!("# TYPE {name} counter\n"));
            let values = family.values.read();
            if values.is_empty() {
                continue;
            }
            for (labels, value) in values.iter() {
                out.push_str(&format!("{name}{} {}\n", render_labels(labels), value.load(Ordering::Relaxed)));
            }
        }

        for (name, family) in self.gauges.read().iter() {
            out.push_str(&format!("# HELP {name} {}\n", family.help));
            out.push_str(&format!("# TYPE {name} gauge\n"));
            for (labels, value) in family.values.read().iter() {
                out.push_str(&format!("{name}{} {}\n", render_labels(labels), value.load(Ordering::Relaxed)));
            }
        }

        for (name, family) in self.histograms.read().iter() {
            out.push_str(&format!("# HELP {name} {}\n", family.help));
            out.push_str(&format!("# TYPE {name} histogram\n"));
            for (labels, state) in family.values.read().iter() {
                let mut cumulative = 0u64;
                for (i, bound) in family.buckets.iter().enumerate() {
                    cumulative += state.bucket_counts[i].load(Ordering::Relaxed);
                    let mut le_labels = labels.clone();
                    le_labels.push(("le", format!("{bound}")));
                    out.push_str(&format!("{name}_bucket{} {}\n", render_labels(&le_labels), cumulative));
                }
                let mut inf_labels = labels.clone();
                inf_labels.push(("le", "+Inf".to_string()));
                out.push_str(&format!("{name}_bucket{} {}\n", render_labels(&inf_labels), state.count.load(Ordering::Relaxed)));
                out.push_str(&format!(
                    "{name}_sum{} {}\n",
                    render_labels(labels),
                    state.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
                ));
                out.push_str(&format!("{name}_count{} {}\n", render_labels(labels), state.count.load(Ordering::Relaxed)));
            }
        }

        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn owned_labels(labels: &[(&'static str, &str)]) -> LabelSet {
    labels.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_help_and_type_lines() {
        let registry = Registry::new();
        registry.register_counter("widgets_total", "widgets processed");
        registry.incr_counter("widgets_total", &[("status", "ok")]);

        let text = registry.render();
        assert!(text.contains("# HELP widgets_total widgets processed"));
        assert!(text.contains("# TYPE widgets_total counter"));
        assert!(text.contains("widgets_total{status=\"ok\"} 1"));
    }

    #[test]
    fn gauge_set_and_increment() {
        let registry = Registry::new();
        registry.register_gauge("active", "active things");
        registry.set_gauge("active", &[], 5);
        registry.inc_gauge("active", &[], -2);
        assert!(registry.render().contains("active 3"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = Registry::new();
        registry.register_histogram("latency_seconds", "latency", &[0.1, 1.0]);
        registry.observe_histogram("latency_seconds", &[], 0.05);
        registry.observe_histogram("latency_seconds", &[], 0.5);
        let text = registry.render();
        assert!(text.contains("latency_seconds_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("latency_seconds_bucket{le=\"1\"} 2"));
        assert!(text.contains("latency_seconds_count 2"));
    }
}
