//! `EndpointsWatcher`: service + endpoints/slices + pod + server fusion.
//!
//! Maintains, for every service observed, a `ServicePublisher` that owns
//! zero-or-more `portPublisher`s keyed by `(srcPort, hostname)`. Each
//! portPublisher recomputes its `AddressSet` whenever any of its inputs
//! change and republishes only if the result actually differs.

use std::net::IpAddr;
use std::sync::Arc;

use ahash::AHashMap;
use linkerd_discovery_core::{
    Address, AddressId, AddressSet, AddressTopic, AddressTopicWriter, DiscoveryError,
    ExternalWorkloadId, IpFamily, PodId, ServiceId, SnapshotState,
};
use linkerd_discovery_k8s_api::{
    self as k8s,
    policy::server::{ProxyProtocol, ServerSpec},
    ResourceExt,
};
use parking_lot::RwLock;

use crate::owner_chain::{self, Owner};
use crate::server_match;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryMode {
    Endpoints,
    EndpointSlice,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct ServerId {
    namespace: String,
    name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct PortKey {
    src_port: u16,
    hostname: Option<String>,
}

/// Either a service port's integer value or its name, to be resolved against
/// endpoint subset/slice port names.
#[derive(Clone, Debug, Eq, PartialEq)]
enum TargetPort {
    Number(u16),
    Name(String),
}

#[derive(Default, Clone)]
struct PodInfo {
    labels: k8s::Labels,
    spec: Option<k8s::PodSpec>,
    owner: Owner,
}

#[derive(Clone)]
struct WorkloadInfo {
    labels: k8s::Labels,
    spec: k8s::external_workload::ExternalWorkloadSpec,
}

struct PortPublisher {
    key: PortKey,
    writer: AddressTopicWriter,
}

#[derive(Default)]
struct ServicePublisher {
    svc: Option<k8s::Service>,
    endpoints: Option<k8s::Endpoints>,
    slices: AHashMap<String, k8s::EndpointSlice>,
    publishers: AHashMap<PortKey, Arc<PortPublisher>>,
}

impl ServicePublisher {
    fn is_external_name(&self) -> bool {
        self.svc
            .as_ref()
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.type_.as_deref())
            == Some("ExternalName")
    }

    fn local_traffic_policy(&self) -> bool {
        self.svc
            .as_ref()
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.internal_traffic_policy.as_deref())
            == Some("Local")
    }

    fn resolve_target_port(&self, src_port: u16) -> TargetPort {
        let named = self
            .svc
            .as_ref()
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.ports.as_ref())
            .into_iter()
            .flatten()
            .find(|p| u16::try_from(p.port).ok() == Some(src_port))
            .and_then(|p| p.name.clone());
        match named {
            Some(name) => TargetPort::Name(name),
            None => TargetPort::Number(src_port),
        }
    }
}

/// Primary fusion engine: resolves `(service, port, hostname)` subscriptions
/// to address-set snapshots.
pub struct EndpointsWatcher {
    mode: DiscoveryMode,
    cluster: String,
    client: Option<k8s::Client>,
    pods: RwLock<AHashMap<PodId, PodInfo>>,
    workloads: RwLock<AHashMap<ExternalWorkloadId, WorkloadInfo>>,
    servers: RwLock<AHashMap<ServerId, ServerSpec>>,
    services: RwLock<AHashMap<ServiceId, ServicePublisher>>,
    /// Reverse index from `(namespace, slice name)` to the service it was
    /// last applied under, so a delete event (which carries only a name)
    /// can still find the right `ServicePublisher`.
    slice_owners: RwLock<AHashMap<(String, String), ServiceId>>,
}

impl EndpointsWatcher {
    pub fn new(mode: DiscoveryMode, cluster: impl Into<String>, client: Option<k8s::Client>) -> Self {
        Self {
            mode,
            cluster: cluster.into(),
            client,
            pods: RwLock::new(AHashMap::new()),
            workloads: RwLock::new(AHashMap::new()),
            servers: RwLock::new(AHashMap::new()),
            services: RwLock::new(AHashMap::new()),
            slice_owners: RwLock::new(AHashMap::new()),
        }
    }

    /// The client this watcher was constructed with, if any (`None` for a
    /// watcher whose cluster lacks a resolvable kubeconfig).
    pub fn client(&self) -> Option<k8s::Client> {
        self.client.clone()
    }

    /// Returns a topic for `(service, port, hostname)`. Fails synchronously
    /// if the service is known to be an `ExternalName`.
    pub fn subscribe(
        &self,
        service: ServiceId,
        port: u16,
        hostname: Option<String>,
    ) -> Result<AddressTopic, DiscoveryError> {
        let key = PortKey { src_port: port, hostname };
        let mut services = self.services.write();
        let publisher = services.entry(service.clone()).or_default();
        if publisher.is_external_name() {
            return Err(DiscoveryError::InvalidService(format!(
                "{service} is an ExternalName service"
            )));
        }

        if let Some(existing) = publisher.publishers.get(&key) {
            return Ok(existing.writer.subscribe());
        }

        let exists = publisher.svc.is_some();
        let state = if exists {
            self.compute_state(&service, publisher, &key)
        } else {
            SnapshotState::NoEndpoints { exists: false }
        };
        let (writer, topic) = AddressTopicWriter::new(state);
        publisher
            .publishers
            .insert(key.clone(), Arc::new(PortPublisher { key, writer }));
        Ok(topic)
    }

    fn compute_state(&self, service: &ServiceId, publisher: &ServicePublisher, key: &PortKey) -> SnapshotState {
        let target = publisher.resolve_target_port(key.src_port);
        let pods = self.pods.read();
        let workloads = self.workloads.read();
        let servers = self.servers.read();

        let mut set = AddressSet::new(self.cluster.clone());
        set.local_traffic_policy = publisher.local_traffic_policy();

        match self.mode {
            DiscoveryMode::Endpoints => {
                if let Some(ep) = publisher.endpoints.as_ref() {
                    self.endpoints_to_addresses(ep, &target, key.src_port, key.hostname.as_deref(), &pods, &workloads, &servers, &mut set);
                }
            }
            DiscoveryMode::EndpointSlice => {
                for slice in publisher.slices.values() {
                    self.slice_to_addresses(service, slice, &target, key.hostname.as_deref(), &pods, &workloads, &servers, &mut set);
                }
            }
        }

        if set.is_empty() {
            SnapshotState::NoEndpoints { exists: true }
        } else {
            SnapshotState::Exists(set)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn endpoints_to_addresses(
        &self,
        ep: &k8s::Endpoints,
        target: &TargetPort,
        src_port: u16,
        hostname: Option<&str>,
        pods: &AHashMap<PodId, PodInfo>,
        workloads: &AHashMap<ExternalWorkloadId, WorkloadInfo>,
        servers: &AHashMap<ServerId, ServerSpec>,
        set: &mut AddressSet,
    ) {
        let remote_identity = ep.annotations().get("mirror.linkerd.io/remote-gateway-identity").cloned();
        let remote_fq_name = ep.annotations().get("mirror.linkerd.io/remote-svc-fq-name").cloned();

        for subset in ep.subsets.iter().flatten() {
            let resolved_port = match subset
                .ports
                .iter()
                .flatten()
                .find(|p| port_matches(p.name.as_deref(), p.port, target))
            {
                Some(p) => p.port,
                None => continue,
            };
            let Ok(port) = u16::try_from(resolved_port) else { continue };

            for addr in subset.addresses.iter().flatten() {
                if let Some(h) = hostname {
                    if addr.hostname.as_deref() != Some(h) {
                        continue;
                    }
                }
                let Ok(ip) = addr.ip.parse::<IpAddr>() else { continue };

                let (id, mut address) = match &addr.target_ref {
                    Some(target_ref) if target_ref.kind.as_deref() == Some("Pod") => {
                        let pod_id = PodId {
                            namespace: target_ref.namespace.clone().unwrap_or_default(),
                            name: target_ref.name.clone().unwrap_or_default(),
                            ip_family: family_of(ip),
                        };
                        let mut address = Address::new(ip, port);
                        if let Some(info) = pods.get(&pod_id) {
                            address.owner_kind = info.owner.kind.clone();
                            address.owner_name = info.owner.name.clone();
                        }
                        address.pod = Some(pod_id.clone());
                        (AddressId::Pod(pod_id), address)
                    }
                    _ => {
                        let service = ServiceId {
                            namespace: ep.namespace().unwrap_or_default(),
                            name: ep.name_any(),
                        };
                        let mut address = Address::new(ip, port);
                        address.identity = remote_identity.clone().unwrap_or_default();
                        if let Some(fq) = remote_fq_name.as_deref() {
                            address.authority_override = format!("{fq}:{src_port}");
                        }
                        (
                            AddressId::Service {
                                service: service.clone(),
                                ip,
                                port,
                            },
                            address,
                        )
                    }
                };

                address.opaque_protocol = self.is_opaque(&address, pods, workloads, servers);
                set.addresses.insert(id, address);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn slice_to_addresses(
        &self,
        service: &ServiceId,
        slice: &k8s::EndpointSlice,
        target: &TargetPort,
        hostname: Option<&str>,
        pods: &AHashMap<PodId, PodInfo>,
        workloads: &AHashMap<ExternalWorkloadId, WorkloadInfo>,
        servers: &AHashMap<ServerId, ServerSpec>,
        set: &mut AddressSet,
    ) {
        let v6 = slice.address_type == "IPv6";
        let resolved_port = match slice
            .ports
            .iter()
            .flatten()
            .find(|p| port_matches(p.name.as_deref(), p.port.unwrap_or(0), target))
        {
            Some(p) => p.port,
            None => return,
        };
        let Some(Ok(port)) = resolved_port.map(u16::try_from) else { return };

        for endpoint in &slice.endpoints {
            if matches!(endpoint.conditions.as_ref().and_then(|c| c.ready), Some(false)) {
                continue;
            }
            if let Some(h) = hostname {
                if endpoint.hostname.as_deref() != Some(h) {
                    continue;
                }
            }

            for addr in &endpoint.addresses {
                let Ok(ip) = addr.parse::<IpAddr>() else { continue };

                let (id, mut address) = match &endpoint.target_ref {
                    Some(target_ref) if target_ref.kind.as_deref() == Some("Pod") => {
                        let pod_id = PodId {
                            namespace: target_ref.namespace.clone().unwrap_or_default(),
                            name: target_ref.name.clone().unwrap_or_default(),
                            ip_family: if v6 { IpFamily::V6 } else { IpFamily::V4 },
                        };
                        let mut address = Address::new(ip, port);
                        if let Some(info) = pods.get(&pod_id) {
                            address.owner_kind = info.owner.kind.clone();
                            address.owner_name = info.owner.name.clone();
                        }
                        address.pod = Some(pod_id.clone());
                        (AddressId::Pod(pod_id), address)
                    }
                    Some(target_ref) if target_ref.kind.as_deref() == Some("ExternalWorkload") => {
                        let wl_id = ExternalWorkloadId {
                            namespace: target_ref.namespace.clone().unwrap_or_default(),
                            name: target_ref.name.clone().unwrap_or_default(),
                        };
                        let mut address = Address::new(ip, port);
                        if let Some(info) = workloads.get(&wl_id) {
                            address.identity = info.spec.mesh_tls.identity.clone();
                        }
                        address.workload = Some(wl_id.clone());
                        (AddressId::Workload(wl_id), address)
                    }
                    _ => {
                        let address = Address::new(ip, port);
                        (
                            AddressId::Service {
                                service: service.clone(),
                                ip,
                                port,
                            },
                            address,
                        )
                    }
                };

                if let Some(hints) = &endpoint.hints {
                    if let Some(zone) = hints.for_zones.as_ref().and_then(|z| z.first()) {
                        address.zone = Some(zone.name.clone());
                    }
                    address.for_zones = hints
                        .for_zones
                        .iter()
                        .flatten()
                        .map(|z| z.name.clone())
                        .collect();
                }

                address.opaque_protocol = self.is_opaque(&address, pods, workloads, servers);
                set.addresses.insert(id, address);
            }
        }
    }

    fn is_opaque(
        &self,
        address: &Address,
        pods: &AHashMap<PodId, PodInfo>,
        workloads: &AHashMap<ExternalWorkloadId, WorkloadInfo>,
        servers: &AHashMap<ServerId, ServerSpec>,
    ) -> bool {
        if let Some(pod_id) = &address.pod {
            if let Some(info) = pods.get(pod_id) {
                return servers
                    .iter()
                    .filter(|(id, _)| id.namespace == pod_id.namespace)
                    .any(|(_, server)| {
                        matches!(server.proxy_protocol, Some(ProxyProtocol::Opaque))
                            && server_match::matches_pod(
                                &server.pod_selector,
                                &server.port,
                                &info.labels,
                                info.spec.as_ref(),
                                address.port,
                            )
                    });
            }
        }
        if let Some(wl_id) = &address.workload {
            if let Some(info) = workloads.get(wl_id) {
                return servers
                    .iter()
                    .filter(|(id, _)| id.namespace == wl_id.namespace)
                    .any(|(_, server)| {
                        matches!(server.proxy_protocol, Some(ProxyProtocol::Opaque))
                            && server_match::matches_workload(
                                &server.pod_selector,
                                &server.port,
                                &info.labels,
                                &info.spec,
                                address.port,
                            )
                    });
            }
        }
        false
    }

    fn recompute_service(&self, id: &ServiceId) {
        let mut services = self.services.write();
        let Some(publisher) = services.get_mut(id) else {
            return;
        };
        let keys: Vec<PortKey> = publisher.publishers.keys().cloned().collect();
        for key in keys {
            let state = self.compute_state(id, publisher, &key);
            if let Some(port_publisher) = publisher.publishers.get(&key) {
                port_publisher.writer.publish(|_| state.clone());
            }
        }
    }

    pub fn apply_service(&self, svc: k8s::Service) {
        let id = ServiceId {
            namespace: svc.namespace().unwrap_or_default(),
            name: svc.name_any(),
        };
        {
            let mut services = self.services.write();
            let publisher = services.entry(id.clone()).or_default();
            publisher.svc = Some(svc);
        }
        self.recompute_service(&id);
    }

    pub fn delete_service(&self, namespace: String, name: String) {
        let id = ServiceId { namespace, name };
        if let Some(mut publisher) = self.services.write().remove(&id) {
            for (_, p) in publisher.publishers.drain() {
                p.writer.publish_always(SnapshotState::NoEndpoints { exists: false });
            }
        }
    }

    pub fn apply_endpoints(&self, ep: k8s::Endpoints) {
        debug_assert_eq!(self.mode, DiscoveryMode::Endpoints);
        let id = ServiceId {
            namespace: ep.namespace().unwrap_or_default(),
            name: ep.name_any(),
        };
        {
            let mut services = self.services.write();
            let publisher = services.entry(id.clone()).or_default();
            publisher.endpoints = Some(ep);
        }
        self.recompute_service(&id);
    }

    pub fn delete_endpoints(&self, namespace: String, name: String) {
        let id = ServiceId { namespace, name };
        if let Some(publisher) = self.services.write().get_mut(&id) {
            publisher.endpoints = None;
        }
        self.recompute_service(&id);
    }

    pub fn apply_endpoint_slice(&self, owning_service: ServiceId, slice: k8s::EndpointSlice) {
        debug_assert_eq!(self.mode, DiscoveryMode::EndpointSlice);
        let namespace = slice.namespace().unwrap_or_default();
        let slice_name = slice.name_any();
        self.slice_owners
            .write()
            .insert((namespace, slice_name.clone()), owning_service.clone());
        {
            let mut services = self.services.write();
            let publisher = services.entry(owning_service.clone()).or_default();
            publisher.slices.insert(slice_name, slice);
        }
        self.recompute_service(&owning_service);
    }

    /// Deletes a slice by name alone, consulting the reverse index recorded
    /// at apply-time to find which service it last belonged to.
    pub fn delete_endpoint_slice(&self, namespace: String, slice_name: String) {
        let Some(owning_service) = self
            .slice_owners
            .write()
            .remove(&(namespace, slice_name.clone()))
        else {
            return;
        };
        if let Some(publisher) = self.services.write().get_mut(&owning_service) {
            publisher.slices.remove(&slice_name);
        }
        self.recompute_service(&owning_service);
    }

    /// Records a pod's labels/spec, keeping any already-resolved owner.
    /// Returns the pod's owner references so the caller can resolve them
    /// (an async, possibly network-bound operation this watcher never
    /// performs itself) and feed the result back through `apply_pod_owner`.
    pub fn apply_pod(&self, pod: k8s::Pod) -> Vec<k8s::apimachinery::pkg::apis::meta::v1::OwnerReference> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let owner_refs = pod.owner_references().to_vec();
        let labels: k8s::Labels = pod.metadata.labels.clone().into();
        let spec = pod.spec.clone();

        let mut pods = self.pods.write();
        for family in [IpFamily::V4, IpFamily::V6] {
            let id = PodId { namespace: namespace.clone(), name: name.clone(), ip_family: family };
            let owner = pods.get(&id).map(|info| info.owner.clone()).unwrap_or_default();
            pods.insert(id, PodInfo { labels: labels.clone(), spec: spec.clone(), owner });
        }
        owner_refs
    }

    /// Resolves `owner_refs` against this watcher's client and, if
    /// configured and resolvable, applies the result via `apply_pod_owner`.
    pub async fn resolve_pod_owner(
        &self,
        namespace: String,
        name: String,
        owner_refs: Vec<k8s::apimachinery::pkg::apis::meta::v1::OwnerReference>,
    ) {
        let Some(client) = self.client.clone() else {
            return;
        };
        if let Some(owner) = owner_chain::resolve(&client, &namespace, &owner_refs).await {
            self.apply_pod_owner(&namespace, &name, owner);
        }
    }

    /// Applies a resolved owner chain to a cached pod and republishes every
    /// service that might reference it.
    pub fn apply_pod_owner(&self, namespace: &str, name: &str, owner: Owner) {
        let mut touched_services = Vec::new();
        {
            let mut pods = self.pods.write();
            for family in [IpFamily::V4, IpFamily::V6] {
                let id = PodId { namespace: namespace.to_string(), name: name.to_string(), ip_family: family };
                if let Some(info) = pods.get_mut(&id) {
                    info.owner = owner.clone();
                }
            }
        }
        for (id, publisher) in self.services.read().iter() {
            if !publisher.publishers.is_empty() {
                touched_services.push(id.clone());
            }
        }
        for id in touched_services {
            self.recompute_service(&id);
        }
    }

    pub fn delete_pod(&self, namespace: String, name: String) {
        let mut pods = self.pods.write();
        for family in [IpFamily::V4, IpFamily::V6] {
            pods.remove(&PodId { namespace: namespace.clone(), name: name.clone(), ip_family: family });
        }
    }

    pub fn apply_workload(&self, workload: k8s::external_workload::ExternalWorkload) {
        let id = ExternalWorkloadId {
            namespace: workload.namespace().unwrap_or_default(),
            name: workload.name_any(),
        };
        self.workloads.write().insert(
            id,
            WorkloadInfo {
                labels: workload.metadata.labels.clone().into(),
                spec: workload.spec,
            },
        );
    }

    pub fn delete_workload(&self, namespace: String, name: String) {
        self.workloads.write().remove(&ExternalWorkloadId { namespace, name });
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
        let ids: Vec<ServiceId> = self
            .services
            .read()
            .keys()
            .filter(|id| id.namespace == namespace)
            .cloned()
            .collect();
        for id in ids {
            self.recompute_service(&id);
        }
    }

    /// Tears down every publisher, emitting a terminal "no endpoints,
    /// exists=false" notification to each subscriber.
    pub fn stop(&self) {
        for (_, mut publisher) in self.services.write().drain() {
            for (_, p) in publisher.publishers.drain() {
                p.writer.publish_always(SnapshotState::NoEndpoints { exists: false });
            }
        }
    }
}

fn port_matches(name: Option<&str>, port: i32, target: &TargetPort) -> bool {
    match target {
        TargetPort::Number(n) => i32::from(*n) == port,
        TargetPort::Name(want) => name == Some(want.as_str()),
    }
}

fn family_of(ip: IpAddr) -> IpFamily {
    match ip {
        IpAddr::V4(_) => IpFamily::V4,
        IpAddr::V6(_) => IpFamily::V6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1::{ObjectReference, ServicePort, ServiceSpec};
    use k8s::api::discovery::v1::EndpointPort as SliceEndpointPort;
    use k8s::{EndpointConditions, ObjectMeta};

    fn service_id() -> ServiceId {
        ServiceId { namespace: "ns".to_string(), name: "web".to_string() }
    }

    fn service() -> k8s::Service {
        k8s::Service {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn slice(name: &str, pod_name: &str, ip: &str) -> k8s::EndpointSlice {
        k8s::EndpointSlice {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: vec![k8s::Endpoint {
                addresses: vec![ip.to_string()],
                conditions: Some(EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                target_ref: Some(ObjectReference {
                    kind: Some("Pod".to_string()),
                    namespace: Some("ns".to_string()),
                    name: Some(pod_name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ports: Some(vec![SliceEndpointPort {
                name: Some("http".to_string()),
                port: Some(8080),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn subscribe_before_service_seen_is_unknown() {
        let watcher = EndpointsWatcher::new(DiscoveryMode::EndpointSlice, "local", None);
        let mut topic = watcher.subscribe(service_id(), 80, None).unwrap();
        assert_eq!(topic.current().value, SnapshotState::NoEndpoints { exists: false });
    }

    #[test]
    fn service_with_no_slices_is_empty_but_exists() {
        let watcher = EndpointsWatcher::new(DiscoveryMode::EndpointSlice, "local", None);
        watcher.apply_service(service());
        let mut topic = watcher.subscribe(service_id(), 80, None).unwrap();
        assert_eq!(topic.current().value, SnapshotState::NoEndpoints { exists: true });
    }

    #[test]
    fn named_port_resolves_through_slice_and_tracks_deletes() {
        let watcher = EndpointsWatcher::new(DiscoveryMode::EndpointSlice, "local", None);
        watcher.apply_service(service());
        let mut topic = watcher.subscribe(service_id(), 80, None).unwrap();

        watcher.apply_endpoint_slice(service_id(), slice("web-x9k2", "web-0", "10.0.0.1"));
        let state = topic.current().value;
        let set = state.as_address_set().expect("addresses");
        assert_eq!(set.len(), 1);
        let address = set.addresses.values().next().unwrap();
        assert_eq!(address.port, 8080);

        watcher.delete_endpoint_slice(service_id().namespace, "web-x9k2".to_string());
        assert_eq!(topic.current().value, SnapshotState::NoEndpoints { exists: true });
    }

    #[test]
    fn mirrored_endpoint_authority_override_uses_subscription_port() {
        let watcher = EndpointsWatcher::new(DiscoveryMode::Endpoints, "local", None);
        watcher.apply_service(service());
        let mut topic = watcher.subscribe(service_id(), 8989, None).unwrap();

        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(
            "mirror.linkerd.io/remote-gateway-identity".to_string(),
            "gateway-identity-1".to_string(),
        );
        annotations.insert(
            "mirror.linkerd.io/remote-svc-fq-name".to_string(),
            "name1-remote-fq".to_string(),
        );
        let ep = k8s::Endpoints {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            subsets: Some(vec![k8s::api::core::v1::EndpointSubset {
                addresses: Some(vec![k8s::api::core::v1::EndpointAddress {
                    ip: "172.17.0.12".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![k8s::api::core::v1::EndpointPort {
                    name: Some("http".to_string()),
                    port: 9999,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        };
        watcher.apply_endpoints(ep);

        let state = topic.current().value;
        let set = state.as_address_set().expect("addresses");
        let address = set.addresses.values().next().unwrap();
        assert_eq!(address.port, 9999);
        assert_eq!(address.identity, "gateway-identity-1");
        assert_eq!(address.authority_override, "name1-remote-fq:8989");
    }

    #[test]
    fn external_name_service_rejects_subscription() {
        let watcher = EndpointsWatcher::new(DiscoveryMode::EndpointSlice, "local", None);
        let mut svc = service();
        svc.spec.as_mut().unwrap().type_ = Some("ExternalName".to_string());
        watcher.apply_service(svc);
        assert!(watcher.subscribe(service_id(), 80, None).is_err());
    }
}
