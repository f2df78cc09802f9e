//! Publishes `TrafficSplit` CRs, keyed by apex `ServiceId` (`spec.service`).

use ahash::AHashMap;
use linkerd_discovery_core::{ServiceId, Topic, TopicWriter};
use linkerd_discovery_k8s_api::{self as k8s, policy::TrafficSplitSpec, ResourceExt};
use parking_lot::RwLock;

/// Splits are indexed by their own `(namespace, name)` for delete lookups but
/// published under the apex service they name in `spec.service`.
#[derive(Default)]
pub struct TrafficSplitWatcher {
    by_apex: RwLock<AHashMap<ServiceId, TopicWriter<Option<TrafficSplitSpec>>>>,
    apex_by_split: RwLock<AHashMap<(String, String), ServiceId>>,
}

impl TrafficSplitWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, apex: &ServiceId) -> Topic<Option<TrafficSplitSpec>> {
        let by_apex = self.by_apex.read();
        if let Some(writer) = by_apex.get(apex) {
            return writer.subscribe();
        }
        drop(by_apex);
        let (writer, topic) = TopicWriter::new(None);
        self.by_apex.write().insert(apex.clone(), writer);
        topic
    }

    pub fn apply(&self, split: k8s::policy::TrafficSplit) {
        let namespace = split.namespace().unwrap_or_default();
        let name = split.name_any();
        let apex = ServiceId {
            namespace: namespace.clone(),
            name: split.spec.service.clone(),
        };

        self.apex_by_split
            .write()
            .insert((namespace, name), apex.clone());

        let spec = split.spec;
        let mut by_apex = self.by_apex.write();
        match by_apex.get(&apex) {
            Some(writer) => writer.publish_always(Some(spec)),
            None => {
                let (writer, _topic) = TopicWriter::new(Some(spec));
                by_apex.insert(apex, writer);
            }
        }
    }

    pub fn delete(&self, namespace: String, name: String) {
        let apex = self
            .apex_by_split
            .write()
            .remove(&(namespace, name));
        if let Some(apex) = apex {
            if let Some(writer) = self.by_apex.read().get(&apex) {
                writer.publish_always(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apex() -> ServiceId {
        ServiceId {
            namespace: "ns".to_string(),
            name: "web".to_string(),
        }
    }

    fn spec() -> TrafficSplitSpec {
        TrafficSplitSpec {
            service: "web".to_string(),
            backends: vec![],
        }
    }

    #[test]
    fn subscribe_before_any_split_delivers_none() {
        let watcher = TrafficSplitWatcher::new();
        let mut topic = watcher.subscribe(&apex());
        assert_eq!(topic.current().value, None);
    }

    #[test]
    fn apply_then_delete_round_trips() {
        let watcher = TrafficSplitWatcher::new();
        let mut topic = watcher.subscribe(&apex());

        let mut cr = k8s::policy::TrafficSplit::new("web-split", spec());
        cr.metadata.namespace = Some("ns".to_string());
        watcher.apply(cr);
        assert_eq!(topic.current().value, Some(spec()));

        watcher.delete("ns".to_string(), "web-split".to_string());
        assert_eq!(topic.current().value, None);
    }
}
