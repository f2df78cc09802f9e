//! Label-keyed counters/gauges for the watchers in this crate.
//!
//! Unlike the upstream policy-controller's `IndexMetrics<T>` (which wraps a
//! single `kubert::index::IndexNamespacedResource` impl per resource kind),
//! each publisher here handles several resource kinds across several
//! `apply_*`/`delete_*` methods, so metrics are recorded at the call site in
//! the runtime layer rather than via a blanket trait impl.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

/// Registered once per watcher under a distinct metric-name prefix
/// (`endpoints_watcher`, `workload_watcher`, `cluster_store`, ...).
pub struct WatcherMetrics {
    applies: Family<KindLabels, Counter>,
    deletes: Family<KindLabels, Counter>,
    size: Family<KindLabels, Gauge>,
}

impl WatcherMetrics {
    pub fn register(prefix: &str, registry: &mut Registry) -> Self {
        let applies = Family::default();
        registry.register(
            format!("{prefix}_applies"),
            "Count of resource applies handled by this watcher",
            applies.clone(),
        );

        let deletes = Family::default();
        registry.register(
            format!("{prefix}_deletes"),
            "Count of resource deletes handled by this watcher",
            deletes.clone(),
        );

        let size = Family::default();
        registry.register(
            format!("{prefix}_size"),
            "Number of entries currently tracked by this watcher",
            size.clone(),
        );

        Self {
            applies,
            deletes,
            size,
        }
    }

    pub fn record_apply(&self, kind: &'static str) {
        self.applies.get_or_create(&KindLabels { kind }).inc();
    }

    pub fn record_delete(&self, kind: &'static str) {
        self.deletes.get_or_create(&KindLabels { kind }).inc();
    }

    pub fn set_size(&self, kind: &'static str, size: usize) {
        self.size.get_or_create(&KindLabels { kind }).set(size as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_record_does_not_panic() {
        let mut registry = Registry::default();
        let metrics = WatcherMetrics::register("endpoints_watcher", &mut registry);
        metrics.record_apply("Service");
        metrics.record_delete("Service");
        metrics.set_size("Service", 3);
    }
}
