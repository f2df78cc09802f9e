//! Publishes whether a `(pod, port)` is selected by an opaque `Server`.

use std::sync::Arc;

use ahash::AHashMap;
use linkerd_discovery_core::{PodId, Topic, TopicWriter};
use linkerd_discovery_k8s_api::{
    self as k8s,
    policy::server::{ProxyProtocol, ServerSpec},
    ResourceExt,
};
use parking_lot::RwLock;

use crate::server_match;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct ServerId {
    namespace: String,
    name: String,
}

struct PodPublisher {
    labels: k8s::Labels,
    spec: Option<k8s::PodSpec>,
    port: u16,
    writer: TopicWriter<bool>,
}

/// Keyed by `(pod, port)`. Republishes whenever a `Server` that could select
/// the pod is added, updated, or deleted.
pub struct ServerWatcher {
    servers: RwLock<AHashMap<ServerId, ServerSpec>>,
    publishers: RwLock<AHashMap<(PodId, u16), Arc<PodPublisher>>>,
}

impl Default for ServerWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerWatcher {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(AHashMap::new()),
            publishers: RwLock::new(AHashMap::new()),
        }
    }

    fn evaluate(&self, namespace: &str, labels: &k8s::Labels, spec: Option<&k8s::PodSpec>, port: u16) -> bool {
        self.servers
            .read()
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .any(|(_, server)| {
                matches!(server.proxy_protocol, Some(ProxyProtocol::Opaque))
                    && server_match::matches_pod(&server.pod_selector, &server.port, labels, spec, port)
            })
    }

    pub fn subscribe(
        &self,
        pod: PodId,
        port: u16,
        labels: k8s::Labels,
        spec: Option<k8s::PodSpec>,
    ) -> Topic<bool> {
        let mut publishers = self.publishers.write();
        if let Some(existing) = publishers.get(&(pod.clone(), port)) {
            return existing.writer.subscribe();
        }
        let opaque = self.evaluate(&pod.namespace, &labels, spec.as_ref(), port);
        let (writer, topic) = TopicWriter::new(opaque);
        publishers.insert(
            (pod.clone(), port),
            Arc::new(PodPublisher { labels, spec, port, writer }),
        );
        topic
    }

    pub fn apply_server(&self, server: k8s::policy::Server) {
        let id = ServerId {
            namespace: server.namespace().unwrap_or_default(),
            name: server.name_any(),
        };
        self.servers.write().insert(id.clone(), server.spec);
        self.republish_namespace(&id.namespace);
    }

    pub fn delete_server(&self, namespace: String, name: String) {
        self.servers.write().remove(&ServerId { namespace: namespace.clone(), name });
        self.republish_namespace(&namespace);
    }

    fn republish_namespace(&self, namespace: &str) {
        for ((pod, port), publisher) in self.publishers.read().iter() {
            if pod.namespace != namespace {
                continue;
            }
            let opaque = self.evaluate(namespace, &publisher.labels, publisher.spec.as_ref(), *port);
            publisher.writer.publish(|_| opaque);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::labels::Selector;
    use k8s::policy::server::Port;
    use k8s::ObjectMeta;
    use linkerd_discovery_core::IpFamily;
    use std::iter::FromIterator;

    fn pod_id() -> PodId {
        PodId {
            namespace: "ns".to_string(),
            name: "web-0".to_string(),
            ip_family: IpFamily::V4,
        }
    }

    fn server(selector: Selector, port: Port, opaque: bool) -> k8s::policy::Server {
        k8s::policy::Server::new(
            "srv",
            ServerSpec {
                pod_selector: selector,
                port,
                proxy_protocol: Some(if opaque {
                    ProxyProtocol::Opaque
                } else {
                    ProxyProtocol::Http1
                }),
            },
        )
    }

    fn with_namespace(mut srv: k8s::policy::Server, ns: &str) -> k8s::policy::Server {
        srv.metadata = ObjectMeta {
            namespace: Some(ns.to_string()),
            ..srv.metadata
        };
        srv
    }

    #[test]
    fn subscribe_before_any_server_is_not_opaque() {
        let watcher = ServerWatcher::new();
        let labels = k8s::Labels::from_iter(Some(("app", "web")));
        let mut topic = watcher.subscribe(pod_id(), 80, labels, None);
        assert!(!topic.current().value);
    }

    #[test]
    fn opaque_server_flips_existing_subscription() {
        let watcher = ServerWatcher::new();
        let labels = k8s::Labels::from_iter(Some(("app", "web")));
        let mut topic = watcher.subscribe(pod_id(), 80, labels, None);
        assert!(!topic.current().value);

        let srv = with_namespace(
            server(Selector::from_iter(Some(("app", "web"))), Port::Number(80), true),
            "ns",
        );
        watcher.apply_server(srv);
        assert!(topic.current().value);
    }

    #[test]
    fn removing_the_opaque_server_reverts_to_false() {
        let watcher = ServerWatcher::new();
        let labels = k8s::Labels::from_iter(Some(("app", "web")));
        let mut topic = watcher.subscribe(pod_id(), 80, labels, None);

        let srv = with_namespace(
            server(Selector::from_iter(Some(("app", "web"))), Port::Number(80), true),
            "ns",
        );
        watcher.apply_server(srv);
        assert!(topic.current().value);

        watcher.delete_server("ns".to_string(), "srv".to_string());
        assert!(!topic.current().value);
    }
}
