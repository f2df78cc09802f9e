//! `WorkloadWatcher`: resolves direct `(ip, port)` endpoint queries against
//! local pods and external workloads.
//!
//! Unlike `EndpointsWatcher`, which fans a service out to many addresses,
//! this publishes exactly one `Address` per subscription key and keeps it
//! refreshed as the backing pod/workload/`Server` set changes.

use std::net::IpAddr;
use std::sync::Arc;

use ahash::AHashMap;
use linkerd_discovery_core::{
    Address, DiscoveryError, ExternalWorkloadId, IpFamily, IpPort, PodId, ServiceId, Topic,
    TopicWriter,
};
use linkerd_discovery_k8s_api::{
    self as k8s,
    policy::server::{ProxyProtocol, ServerSpec},
    ResourceExt,
};
use parking_lot::RwLock;

use crate::named_ports;
use crate::opaque_ports::OPAQUE_PORTS_ANNOTATION;
use crate::owner_chain::Owner;
use crate::ports::{parse_port_spec, PortSet};
use crate::server_match;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct ServerId {
    namespace: String,
    name: String,
}

#[derive(Clone, Default)]
struct PodRecord {
    namespace: String,
    name: String,
    labels: k8s::Labels,
    spec: Option<k8s::PodSpec>,
    ips: Vec<IpAddr>,
    running: bool,
    owner: Owner,
    opaque_annotation: Option<String>,
}

fn family_of(ip: IpAddr) -> IpFamily {
    match ip {
        IpAddr::V4(_) => IpFamily::V4,
        IpAddr::V6(_) => IpFamily::V6,
    }
}

#[derive(Clone)]
struct WorkloadRecord {
    id: ExternalWorkloadId,
    labels: k8s::Labels,
    spec: k8s::external_workload::ExternalWorkloadSpec,
    ips: Vec<IpAddr>,
    opaque_annotation: Option<String>,
}

/// Keyed by `IpPort`. Publishes a single `Address`; `pod`/`workload` are
/// `None` (and owner/opaque fields cleared) when nothing currently backs
/// the key.
pub struct WorkloadWatcher {
    default_opaque_ports: PortSet,
    /// Whether a pod leaving `Running` clears its backing the same as a
    /// deletion would. The source behaviour this mirrors clears eagerly;
    /// set `false` to keep serving a stale backing through transient phase
    /// flaps (e.g. `Running` → `Pending` during a restart).
    clear_on_not_running: bool,
    pods: RwLock<AHashMap<(String, String), PodRecord>>,
    workloads: RwLock<AHashMap<ExternalWorkloadId, WorkloadRecord>>,
    servers: RwLock<AHashMap<ServerId, ServerSpec>>,
    publishers: RwLock<AHashMap<IpPort, Arc<TopicWriter<Address>>>>,
    /// Pod IP backing a `(service, hostname)` pair, derived from the
    /// Endpoints/EndpointSlice objects that feed `EndpointsWatcher`, kept
    /// here too so hostname-qualified subscriptions can resolve an IP
    /// before falling through to the regular pod/workload lookup.
    hostnames: RwLock<AHashMap<(ServiceId, String), IpAddr>>,
    /// Reverse index from an EndpointSlice's `(namespace, name)` to the
    /// `(service, hostname)` pairs it last contributed, so a delete event
    /// (which carries only a name) can retract exactly those entries.
    slice_hostnames: RwLock<AHashMap<(String, String), Vec<(ServiceId, String)>>>,
}

impl WorkloadWatcher {
    pub fn new(default_opaque_ports: PortSet, clear_on_not_running: bool) -> Self {
        Self {
            default_opaque_ports,
            clear_on_not_running,
            pods: RwLock::new(AHashMap::new()),
            workloads: RwLock::new(AHashMap::new()),
            servers: RwLock::new(AHashMap::new()),
            publishers: RwLock::new(AHashMap::new()),
            hostnames: RwLock::new(AHashMap::new()),
            slice_hostnames: RwLock::new(AHashMap::new()),
        }
    }

    /// Resolves `(hostname?, service?, ip?, port)` to a single `Address`
    /// topic. If `hostname` is set, the backing IP is first resolved
    /// against the referenced service's endpoints/slices (failing with
    /// `NotFound` if no endpoint carries that hostname); otherwise `ip` is
    /// used directly.
    pub fn subscribe(
        &self,
        hostname: Option<String>,
        service: Option<ServiceId>,
        ip: Option<IpAddr>,
        port: u16,
    ) -> Result<Topic<Address>, DiscoveryError> {
        let ip = self.resolve_ip(hostname.as_deref(), service.as_ref(), ip, port)?;
        let key = IpPort { ip, port };
        let publishers = self.publishers.read();
        if let Some(writer) = publishers.get(&key) {
            return Ok(writer.subscribe());
        }
        drop(publishers);

        let address = self.resolve(&key)?;
        let (writer, topic) = TopicWriter::new(address);
        self.publishers.write().insert(key, Arc::new(writer));
        Ok(topic)
    }

    fn resolve_ip(
        &self,
        hostname: Option<&str>,
        service: Option<&ServiceId>,
        ip: Option<IpAddr>,
        port: u16,
    ) -> Result<IpAddr, DiscoveryError> {
        match hostname {
            Some(hostname) => {
                let service = service.ok_or_else(|| {
                    DiscoveryError::InvalidService(
                        "a hostname-qualified subscription requires a service".to_string(),
                    )
                })?;
                self.hostnames
                    .read()
                    .get(&(service.clone(), hostname.to_string()))
                    .copied()
                    .ok_or_else(|| {
                        DiscoveryError::NotFound(format!(
                            "{service}:{port} has no endpoint with hostname {hostname:?}"
                        ))
                    })
            }
            None => ip.ok_or_else(|| {
                DiscoveryError::InvalidService(
                    "a subscription without a hostname requires an ip".to_string(),
                )
            }),
        }
    }

    fn admits_pod(&self, record: &PodRecord) -> bool {
        !self.clear_on_not_running || record.running
    }

    fn resolve(&self, key: &IpPort) -> Result<Address, DiscoveryError> {
        let pods = self.pods.read();
        let workloads = self.workloads.read();
        let servers = self.servers.read();

        let matching_pods: Vec<&PodRecord> = pods
            .values()
            .filter(|r| self.admits_pod(r) && r.ips.contains(&key.ip))
            .collect();
        let matching_workloads: Vec<&WorkloadRecord> = workloads
            .values()
            .filter(|r| {
                r.ips.contains(&key.ip)
                    && r.spec
                        .ports
                        .iter()
                        .flatten()
                        .any(|p| u16::from(p.port) == key.port)
            })
            .collect();

        if matching_pods.len() + matching_workloads.len() > 1 {
            return Err(DiscoveryError::FailedPrecondition(format!(
                "{key} matches more than one backing pod or workload"
            )));
        }

        let mut address = Address::new(key.ip, key.port);
        if let Some(record) = matching_pods.first() {
            address.pod = Some(PodId {
                namespace: record.namespace.clone(),
                name: record.name.clone(),
                ip_family: family_of(key.ip),
            });
            address.owner_kind = record.owner.kind.clone();
            address.owner_name = record.owner.name.clone();
            address.opaque_protocol = self.is_opaque_pod(record, key.port, &servers);
        } else if let Some(record) = matching_workloads.first() {
            address.workload = Some(record.id.clone());
            address.identity = record.spec.mesh_tls.identity.clone();
            address.opaque_protocol = self.is_opaque_workload(record, key.port, &servers);
        }
        Ok(address)
    }

    fn resolve_opaque_ports_pod(&self, record: &PodRecord) -> PortSet {
        match record.opaque_annotation.as_deref() {
            Some(spec) => parse_port_spec(spec, |name| {
                named_ports::named_tcp_port(record.spec.as_ref(), name)
                    .into_iter()
                    .collect()
            }),
            None => self.default_opaque_ports.clone(),
        }
    }

    fn resolve_opaque_ports_workload(&self, record: &WorkloadRecord) -> PortSet {
        match record.opaque_annotation.as_deref() {
            Some(spec) => parse_port_spec(spec, |name| {
                named_ports::named_workload_port(&record.spec, name)
                    .into_iter()
                    .collect()
            }),
            None => self.default_opaque_ports.clone(),
        }
    }

    fn is_opaque_pod(&self, record: &PodRecord, port: u16, servers: &AHashMap<ServerId, ServerSpec>) -> bool {
        if self
            .resolve_opaque_ports_pod(record)
            .iter()
            .any(|p| u16::from(*p) == port)
        {
            return true;
        }
        servers
            .iter()
            .filter(|(sid, _)| sid.namespace == record.namespace)
            .any(|(_, server)| {
                matches!(server.proxy_protocol, Some(ProxyProtocol::Opaque))
                    && server_match::matches_pod(&server.pod_selector, &server.port, &record.labels, record.spec.as_ref(), port)
            })
    }

    fn is_opaque_workload(&self, record: &WorkloadRecord, port: u16, servers: &AHashMap<ServerId, ServerSpec>) -> bool {
        if self
            .resolve_opaque_ports_workload(record)
            .iter()
            .any(|p| u16::from(*p) == port)
        {
            return true;
        }
        servers
            .iter()
            .filter(|(sid, _)| sid.namespace == record.id.namespace)
            .any(|(_, server)| {
                matches!(server.proxy_protocol, Some(ProxyProtocol::Opaque))
                    && server_match::matches_workload(&server.pod_selector, &server.port, &record.labels, &record.spec, port)
            })
    }

    fn republish(&self, key: &IpPort) {
        let publishers = self.publishers.read();
        let Some(writer) = publishers.get(key) else {
            return;
        };
        match self.resolve(key) {
            Ok(address) => writer.publish(|_| address.clone()),
            Err(_) => writer.publish(|current| Address::new(current.ip, current.port)),
        }
    }

    fn republish_ips(&self, ips: &[IpAddr]) {
        let keys: Vec<IpPort> = self
            .publishers
            .read()
            .keys()
            .filter(|k| ips.contains(&k.ip))
            .cloned()
            .collect();
        for key in keys {
            self.republish(&key);
        }
    }

    pub fn apply_pod(&self, pod: k8s::Pod) {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let ips: Vec<IpAddr> = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ips.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|ip| ip.ip.as_deref())
            .chain(pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()))
            .filter_map(|ip| ip.parse().ok())
            .collect();
        let running = pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");
        let opaque_annotation = pod.annotations().get(OPAQUE_PORTS_ANNOTATION).cloned();
        let labels: k8s::Labels = pod.metadata.labels.clone().into();
        let spec = pod.spec.clone();

        let key = (namespace.clone(), name.clone());
        let previous_ips = {
            let mut pods = self.pods.write();
            let previous = pods.get(&key).map(|r| r.ips.clone()).unwrap_or_default();
            let owner = pods.get(&key).map(|r| r.owner.clone()).unwrap_or_default();
            pods.insert(
                key,
                PodRecord { namespace, name, labels, spec, ips: ips.clone(), running, owner, opaque_annotation },
            );
            previous
        };

        let mut affected = previous_ips;
        affected.extend(ips);
        self.republish_ips(&affected);
    }

    pub fn apply_pod_owner(&self, namespace: &str, name: &str, owner: Owner) {
        let ips = {
            let mut pods = self.pods.write();
            let Some(record) = pods.get_mut(&(namespace.to_string(), name.to_string())) else {
                return;
            };
            record.owner = owner;
            record.ips.clone()
        };
        self.republish_ips(&ips);
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) {
        let ips = self
            .pods
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|r| r.ips)
            .unwrap_or_default();
        self.republish_ips(&ips);
    }

    pub fn apply_workload(&self, workload: k8s::external_workload::ExternalWorkload, id: ExternalWorkloadId) {
        let ips: Vec<IpAddr> = workload
            .spec
            .workload_ips
            .iter()
            .flatten()
            .filter_map(|ip| ip.ip.parse().ok())
            .collect();
        let opaque_annotation = workload.annotations().get(OPAQUE_PORTS_ANNOTATION).cloned();
        let labels: k8s::Labels = workload.metadata.labels.clone().into();

        let previous_ips = {
            let mut workloads = self.workloads.write();
            let previous = workloads.get(&id).map(|r| r.ips.clone()).unwrap_or_default();
            workloads.insert(
                id.clone(),
                WorkloadRecord { id, labels, spec: workload.spec, ips: ips.clone(), opaque_annotation },
            );
            previous
        };

        let mut affected = previous_ips;
        affected.extend(ips);
        self.republish_ips(&affected);
    }

    pub fn delete_workload(&self, id: &ExternalWorkloadId) {
        let ips = self.workloads.write().remove(id).map(|r| r.ips).unwrap_or_default();
        self.republish_ips(&ips);
    }

    /// Indexes `service`'s hostname-addressed pod IPs for the
    /// `DiscoveryMode::Endpoints` path, replacing whatever was previously
    /// indexed for it (an `Endpoints` object always carries the full
    /// current membership).
    pub fn apply_endpoints(&self, service: ServiceId, ep: &k8s::Endpoints) {
        let mut hostnames = self.hostnames.write();
        hostnames.retain(|(sid, _), _| *sid != service);
        for subset in ep.subsets.iter().flatten() {
            for addr in subset.addresses.iter().flatten() {
                let Some(hostname) = addr.hostname.as_deref() else {
                    continue;
                };
                let Ok(ip) = addr.ip.parse::<IpAddr>() else {
                    continue;
                };
                hostnames.insert((service.clone(), hostname.to_string()), ip);
            }
        }
    }

    pub fn delete_endpoints(&self, service: &ServiceId) {
        self.hostnames.write().retain(|(sid, _), _| sid != service);
    }

    /// Indexes `slice`'s hostname-addressed pod IPs for the
    /// `DiscoveryMode::EndpointSlice` path, tracking which entries came
    /// from this slice so a later delete-by-name can retract exactly them.
    pub fn apply_endpoint_slice(&self, service: ServiceId, slice: &k8s::EndpointSlice) {
        let namespace = slice.namespace().unwrap_or_default();
        let name = slice.name_any();

        let mut entries = Vec::new();
        for endpoint in &slice.endpoints {
            let Some(hostname) = endpoint.hostname.as_deref() else {
                continue;
            };
            let Some(ip) = endpoint.addresses.first().and_then(|a| a.parse::<IpAddr>().ok()) else {
                continue;
            };
            entries.push((service.clone(), hostname.to_string(), ip));
        }

        let keys: Vec<(ServiceId, String)> =
            entries.iter().map(|(sid, hostname, _)| (sid.clone(), hostname.clone())).collect();
        let previous = self
            .slice_hostnames
            .write()
            .insert((namespace, name), keys);

        let mut hostnames = self.hostnames.write();
        for (sid, hostname) in previous.into_iter().flatten() {
            hostnames.remove(&(sid, hostname));
        }
        for (sid, hostname, ip) in entries {
            hostnames.insert((sid, hostname), ip);
        }
    }

    /// Deletes a slice's hostname entries by name alone, consulting the
    /// reverse index recorded at apply-time.
    pub fn delete_endpoint_slice(&self, namespace: String, name: String) {
        let Some(keys) = self.slice_hostnames.write().remove(&(namespace, name)) else {
            return;
        };
        let mut hostnames = self.hostnames.write();
        for key in keys {
            hostnames.remove(&key);
        }
    }

    pub fn apply_server(&self, server: k8s::policy::Server) {
        let id = ServerId {
            namespace: server.namespace().unwrap_or_default(),
            name: server.name_any(),
        };
        let namespace = id.namespace.clone();
        self.servers.write().insert(id, server.spec);
        self.republish_namespace(&namespace);
    }

    pub fn delete_server(&self, namespace: String, name: String) {
        self.servers.write().remove(&ServerId { namespace: namespace.clone(), name });
        self.republish_namespace(&namespace);
    }

    fn republish_namespace(&self, namespace: &str) {
        let keys: Vec<IpPort> = self
            .publishers
            .read()
            .iter()
            .filter(|(_, writer)| {
                let current = writer.current().value;
                current
                    .pod
                    .as_ref()
                    .map(|p| p.namespace == namespace)
                    .or_else(|| current.workload.as_ref().map(|w| w.namespace == namespace))
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.republish(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1::{PodIP, PodStatus};
    use linkerd_discovery_core::IpFamily;
    use std::iter::FromIterator;

    fn pod_id() -> PodId {
        PodId { namespace: "ns".to_string(), name: "web-0".to_string(), ip_family: IpFamily::V4 }
    }

    fn running_pod(ip: &str) -> k8s::Pod {
        k8s::Pod {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web-0".to_string()),
                labels: Some(std::collections::BTreeMap::from_iter(Some(("app".to_string(), "web".to_string())))),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ips: Some(vec![PodIP { ip: Some(ip.to_string()) }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn subscribe_with_no_backing_is_empty_address() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let mut topic = watcher.subscribe(None, None, Some(ip), 80).unwrap();
        let address = topic.current().value;
        assert!(address.pod.is_none());
        assert!(address.workload.is_none());
    }

    #[test]
    fn running_pod_backs_subscription_and_clears_on_delete() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let mut topic = watcher.subscribe(None, None, Some(ip), 80).unwrap();

        watcher.apply_pod(running_pod("10.0.0.9"));
        assert_eq!(topic.current().value.pod, Some(pod_id()));

        watcher.delete_pod("ns", "web-0");
        assert_eq!(topic.current().value.pod, None);
    }

    #[test]
    fn not_running_clears_when_configured_to() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let mut topic = watcher.subscribe(None, None, Some(ip), 80).unwrap();
        watcher.apply_pod(running_pod("10.0.0.9"));
        assert_eq!(topic.current().value.pod, Some(pod_id()));

        let mut pending = running_pod("10.0.0.9");
        pending.status.as_mut().unwrap().phase = Some("Pending".to_string());
        watcher.apply_pod(pending);
        assert_eq!(topic.current().value.pod, None);
    }

    fn service_id() -> ServiceId {
        ServiceId { namespace: "ns".to_string(), name: "web".to_string() }
    }

    #[test]
    fn hostname_without_service_is_invalid() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let err = watcher
            .subscribe(Some("web-0".to_string()), None, None, 80)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidService(_)));
    }

    #[test]
    fn hostname_with_no_matching_endpoint_is_not_found() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let err = watcher
            .subscribe(Some("web-0".to_string()), Some(service_id()), None, 80)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }

    #[test]
    fn hostname_resolves_through_endpoint_slice_and_tracks_deletes() {
        let watcher = WorkloadWatcher::new(PortSet::default(), true);
        let slice = k8s::EndpointSlice {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web-x9k2".to_string()),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: vec![k8s::Endpoint {
                addresses: vec!["10.0.0.9".to_string()],
                hostname: Some("web-0".to_string()),
                ..Default::default()
            }],
            ports: None,
        };
        watcher.apply_endpoint_slice(service_id(), &slice);
        watcher.apply_pod(running_pod("10.0.0.9"));

        let mut topic = watcher
            .subscribe(Some("web-0".to_string()), Some(service_id()), None, 80)
            .unwrap();
        assert_eq!(topic.current().value.pod, Some(pod_id()));

        watcher.delete_endpoint_slice("ns".to_string(), "web-x9k2".to_string());
        let err = watcher
            .subscribe(Some("web-0".to_string()), Some(service_id()), None, 80)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }
}
