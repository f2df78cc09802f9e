//! Publishes service-profile CRs, keyed by `ProfileId`.

use ahash::AHashMap;
use linkerd_discovery_core::{ProfileId, Topic, TopicWriter};
use linkerd_discovery_k8s_api::{self as k8s, policy::ServiceProfileSpec, ResourceExt};
use parking_lot::RwLock;

/// On subscribe, immediately delivers the current profile (possibly `None`)
/// and every subsequent add/update/delete.
#[derive(Default)]
pub struct ProfileWatcher {
    profiles: RwLock<AHashMap<ProfileId, TopicWriter<Option<ServiceProfileSpec>>>>,
}

impl ProfileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, id: &ProfileId) -> Topic<Option<ServiceProfileSpec>> {
        let profiles = self.profiles.read();
        if let Some(writer) = profiles.get(id) {
            return writer.subscribe();
        }
        drop(profiles);
        let (writer, topic) = TopicWriter::new(None);
        self.profiles.write().insert(id.clone(), writer);
        topic
    }

    pub fn apply(&self, profile: k8s::policy::ServiceProfile) {
        let id = ProfileId {
            namespace: profile.namespace().unwrap_or_default(),
            name: profile.name_any(),
        };
        let spec = profile.spec;
        let mut profiles = self.profiles.write();
        match profiles.get(&id) {
            Some(writer) => writer.publish_always(Some(spec)),
            None => {
                let (writer, _topic) = TopicWriter::new(Some(spec));
                profiles.insert(id, writer);
            }
        }
    }

    pub fn delete(&self, namespace: String, name: String) {
        if let Some(writer) = self.profiles.read().get(&ProfileId { namespace, name }) {
            writer.publish_always(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ProfileId {
        ProfileId {
            namespace: "ns".to_string(),
            name: "web".to_string(),
        }
    }

    fn spec() -> ServiceProfileSpec {
        ServiceProfileSpec {
            routes: vec![],
            retry_budget: None,
            opaque_ports: vec![],
            dst_overrides: None,
        }
    }

    #[test]
    fn subscribe_before_any_profile_delivers_none() {
        let watcher = ProfileWatcher::new();
        let mut topic = watcher.subscribe(&id());
        assert_eq!(topic.current().value, None);
    }

    #[test]
    fn apply_then_delete_round_trips() {
        let watcher = ProfileWatcher::new();
        let mut topic = watcher.subscribe(&id());

        let mut cr = k8s::policy::ServiceProfile::new("web", spec());
        cr.metadata.namespace = Some("ns".to_string());
        watcher.apply(cr);
        assert_eq!(topic.current().value, Some(spec()));

        watcher.delete("ns".to_string(), "web".to_string());
        assert_eq!(topic.current().value, None);
    }
}
