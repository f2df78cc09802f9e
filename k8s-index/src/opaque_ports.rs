//! Publishes the resolved opaque-port set for each service.

use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};

use linkerd_discovery_core::{DiscoveryError, ServiceId, Topic, TopicWriter};
use linkerd_discovery_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;

use crate::ports::{parse_port_spec, PortSet};

pub(crate) const OPAQUE_PORTS_ANNOTATION: &str = "config.linkerd.io/opaque-ports";

struct ServiceEntry {
    is_external_name: AtomicBool,
    writer: TopicWriter<PortSet>,
}

/// Keyed by `ServiceId`, publishes the currently effective opaque-port set:
/// the service's own annotation if present, otherwise the process-wide
/// default.
pub struct OpaquePortsWatcher {
    default_opaque_ports: PortSet,
    services: RwLock<ahash::AHashMap<ServiceId, Arc<ServiceEntry>>>,
}

impl OpaquePortsWatcher {
    pub fn new(default_opaque_ports: PortSet) -> Self {
        Self {
            default_opaque_ports,
            services: RwLock::new(ahash::AHashMap::new()),
        }
    }

    pub fn subscribe(&self, id: &ServiceId) -> Result<Topic<PortSet>, DiscoveryError> {
        let services = self.services.read();
        match services.get(id) {
            Some(entry) if entry.is_external_name.load(Ordering::Relaxed) => Err(
                DiscoveryError::InvalidService(format!("{id} is an ExternalName service")),
            ),
            Some(entry) => Ok(entry.writer.subscribe()),
            None => {
                drop(services);
                let (writer, topic) = TopicWriter::new(self.default_opaque_ports.clone());
                self.services.write().insert(
                    id.clone(),
                    Arc::new(ServiceEntry {
                        is_external_name: AtomicBool::new(false),
                        writer,
                    }),
                );
                Ok(topic)
            }
        }
    }

    fn resolve(&self, svc: &k8s::Service) -> PortSet {
        let names: ahash::AHashMap<String, u16> = svc
            .spec
            .iter()
            .flat_map(|s| s.ports.iter().flatten())
            .filter_map(|p| Some((p.name.clone()?, u16::try_from(p.port).ok()?)))
            .collect();

        svc.annotations()
            .get(OPAQUE_PORTS_ANNOTATION)
            .map(|spec| {
                parse_port_spec(spec, |name| {
                    names
                        .get(name)
                        .and_then(|p| std::num::NonZeroU16::try_from(*p).ok())
                        .into_iter()
                        .collect()
                })
            })
            .unwrap_or_else(|| self.default_opaque_ports.clone())
    }

    pub fn apply(&self, svc: k8s::Service) {
        let id = ServiceId {
            namespace: svc.namespace().unwrap_or_default(),
            name: svc.name_any(),
        };
        let is_external_name = svc
            .spec
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            == Some("ExternalName");
        let resolved = self.resolve(&svc);

        let mut services = self.services.write();
        match services.get(&id) {
            Some(entry) => {
                entry
                    .is_external_name
                    .store(is_external_name, Ordering::Relaxed);
                entry.writer.publish(|_| resolved.clone());
            }
            None => {
                let (writer, _topic) = TopicWriter::new(resolved);
                services.insert(
                    id,
                    Arc::new(ServiceEntry {
                        is_external_name: AtomicBool::new(is_external_name),
                        writer,
                    }),
                );
            }
        }
    }

    pub fn delete(&self, namespace: String, name: String) {
        self.services.write().remove(&ServiceId { namespace, name });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s::ObjectMeta;

    fn service(name: &str, annotation: Option<&str>, ports: Vec<ServicePort>) -> k8s::Service {
        let mut annotations = std::collections::BTreeMap::new();
        if let Some(a) = annotation {
            annotations.insert(OPAQUE_PORTS_ANNOTATION.to_string(), a.to_string());
        }
        Service {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some(name.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(ports),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn falls_back_to_default_when_unannotated() {
        let watcher = OpaquePortsWatcher::new(vec![std::num::NonZeroU16::new(25).unwrap()].into_iter().collect());
        watcher.apply(service("web", None, vec![]));
        assert_eq!(
            watcher.resolve(&service("web", None, vec![])),
            vec![std::num::NonZeroU16::new(25).unwrap()].into_iter().collect()
        );
    }

    #[test]
    fn annotation_resolves_named_service_port() {
        let watcher = OpaquePortsWatcher::new(PortSet::default());
        let svc = service(
            "web",
            Some("metrics"),
            vec![ServicePort {
                name: Some("metrics".to_string()),
                port: 9090,
                ..Default::default()
            }],
        );
        let resolved = watcher.resolve(&svc);
        assert_eq!(resolved, vec![std::num::NonZeroU16::new(9090).unwrap()].into_iter().collect());
    }
}
