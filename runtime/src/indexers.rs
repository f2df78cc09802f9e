//! Adapts the publishers in `linkerd-discovery-k8s-index` to `kubert`'s
//! per-resource-kind indexer trait so that `kubert::index::namespaced` can
//! drive them directly off a watch stream.
//!
//! Several adapters fan the same resource kind out to more than one
//! publisher (a `Pod` feeds both `EndpointsWatcher` and `WorkloadWatcher`,
//! for instance); that fan-out lives here rather than in the publishers
//! themselves, which stay ignorant of one another.

use std::sync::Arc;

use kubert::index::IndexNamespacedResource;
use linkerd_discovery_core::{ExternalWorkloadId, ServiceId};
use linkerd_discovery_k8s_api::{self as k8s, ResourceExt};
use linkerd_discovery_k8s_index::{
    ClusterStore, DecodeKubeconfig, EndpointsWatcher, OpaquePortsWatcher, ProfileWatcher,
    ServerWatcher, TrafficSplitWatcher, WatcherMetrics, WorkloadWatcher,
};

const ENDPOINT_SLICE_SERVICE_LABEL: &str = "kubernetes.io/service-name";

/// Spawns the (possibly network-bound) owner-chain resolution for a pod
/// whose apply just completed, feeding the result back into both watchers
/// that care about it.
fn spawn_owner_resolution(
    endpoints: Arc<EndpointsWatcher>,
    workload: Arc<WorkloadWatcher>,
    namespace: String,
    name: String,
    owner_refs: Vec<k8s::apimachinery::pkg::apis::meta::v1::OwnerReference>,
) {
    tokio::spawn(async move {
        let Some(client) = endpoints.client() else {
            return;
        };
        if let Some(owner) =
            linkerd_discovery_k8s_index::resolve_pod_owner_chain(&client, &namespace, &owner_refs)
                .await
        {
            endpoints.apply_pod_owner(&namespace, &name, owner.clone());
            workload.apply_pod_owner(&namespace, &name, owner);
        }
    });
}

pub struct ServiceIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub opaque_ports: Arc<OpaquePortsWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::Service> for ServiceIndexer {
    fn apply(&mut self, svc: k8s::Service) {
        self.opaque_ports.apply(svc.clone());
        self.endpoints.apply_service(svc);
        self.metrics.record_apply("Service");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.opaque_ports.delete(namespace.clone(), name.clone());
        self.endpoints.delete_service(namespace, name);
        self.metrics.record_delete("Service");
    }
}

pub struct EndpointsIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub workload: Arc<WorkloadWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::Endpoints> for EndpointsIndexer {
    fn apply(&mut self, ep: k8s::Endpoints) {
        let service = ServiceId {
            namespace: ep.namespace().unwrap_or_default(),
            name: ep.name_any(),
        };
        self.workload.apply_endpoints(service, &ep);
        self.endpoints.apply_endpoints(ep);
        self.metrics.record_apply("Endpoints");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.workload.delete_endpoints(&ServiceId {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        self.endpoints.delete_endpoints(namespace, name);
        self.metrics.record_delete("Endpoints");
    }
}

pub struct EndpointSliceIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub workload: Arc<WorkloadWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::EndpointSlice> for EndpointSliceIndexer {
    fn apply(&mut self, slice: k8s::EndpointSlice) {
        let namespace = slice.namespace().unwrap_or_default();
        let Some(service_name) = slice.labels().get(ENDPOINT_SLICE_SERVICE_LABEL).cloned() else {
            tracing::debug!(slice = %slice.name_any(), "endpointslice has no owning service label, ignoring");
            return;
        };
        let owning_service = ServiceId {
            namespace,
            name: service_name,
        };
        self.workload.apply_endpoint_slice(owning_service.clone(), &slice);
        self.endpoints.apply_endpoint_slice(owning_service, slice);
        self.metrics.record_apply("EndpointSlice");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.workload
            .delete_endpoint_slice(namespace.clone(), name.clone());
        self.endpoints.delete_endpoint_slice(namespace, name);
        self.metrics.record_delete("EndpointSlice");
    }
}

pub struct PodIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub workload: Arc<WorkloadWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::Pod> for PodIndexer {
    fn apply(&mut self, pod: k8s::Pod) {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        self.workload.apply_pod(pod.clone());
        let owner_refs = self.endpoints.apply_pod(pod);
        spawn_owner_resolution(
            self.endpoints.clone(),
            self.workload.clone(),
            namespace,
            name,
            owner_refs,
        );
        self.metrics.record_apply("Pod");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.workload.delete_pod(&namespace, &name);
        self.endpoints.delete_pod(namespace, name);
        self.metrics.record_delete("Pod");
    }
}

pub struct ExternalWorkloadIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub workload: Arc<WorkloadWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::external_workload::ExternalWorkload> for ExternalWorkloadIndexer {
    fn apply(&mut self, workload: k8s::external_workload::ExternalWorkload) {
        let id = ExternalWorkloadId {
            namespace: workload.namespace().unwrap_or_default(),
            name: workload.name_any(),
        };
        self.workload.apply_workload(workload.clone(), id);
        self.endpoints.apply_workload(workload);
        self.metrics.record_apply("ExternalWorkload");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.workload.delete_workload(&ExternalWorkloadId {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        self.endpoints.delete_workload(namespace, name);
        self.metrics.record_delete("ExternalWorkload");
    }
}

pub struct ServerIndexer {
    pub endpoints: Arc<EndpointsWatcher>,
    pub workload: Arc<WorkloadWatcher>,
    pub servers: Arc<ServerWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::policy::Server> for ServerIndexer {
    fn apply(&mut self, server: k8s::policy::Server) {
        self.servers.apply_server(server.clone());
        self.workload.apply_server(server.clone());
        self.endpoints.apply_server(server);
        self.metrics.record_apply("Server");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.servers
            .delete_server(namespace.clone(), name.clone());
        self.workload.delete_server(namespace.clone(), name.clone());
        self.endpoints.delete_server(namespace, name);
        self.metrics.record_delete("Server");
    }
}

pub struct ProfileIndexer {
    pub profiles: Arc<ProfileWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::policy::ServiceProfile> for ProfileIndexer {
    fn apply(&mut self, profile: k8s::policy::ServiceProfile) {
        self.profiles.apply(profile);
        self.metrics.record_apply("ServiceProfile");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.profiles.delete(namespace, name);
        self.metrics.record_delete("ServiceProfile");
    }
}

pub struct TrafficSplitIndexer {
    pub splits: Arc<TrafficSplitWatcher>,
    pub metrics: Arc<WatcherMetrics>,
}

impl IndexNamespacedResource<k8s::policy::TrafficSplit> for TrafficSplitIndexer {
    fn apply(&mut self, split: k8s::policy::TrafficSplit) {
        self.splits.apply(split);
        self.metrics.record_apply("TrafficSplit");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.splits.delete(namespace, name);
        self.metrics.record_delete("TrafficSplit");
    }
}

/// Feeds the cluster-local Secret informer to `ClusterStore`. Apply is async
/// (kubeconfig decoding dials the remote apiserver), so it's handed off to
/// its own task; `ClusterStore`'s internal locking makes that safe to do
/// unordered with deletes.
pub struct SecretIndexer<D> {
    pub clusters: Arc<ClusterStore<D>>,
    pub metrics: Arc<WatcherMetrics>,
}

impl<D: DecodeKubeconfig> IndexNamespacedResource<k8s::Secret> for SecretIndexer<D> {
    fn apply(&mut self, secret: k8s::Secret) {
        let clusters = self.clusters.clone();
        tokio::spawn(async move { clusters.apply_secret(secret).await });
        self.metrics.record_apply("Secret");
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.clusters.delete_secret(namespace, name);
        self.metrics.record_delete("Secret");
    }
}
