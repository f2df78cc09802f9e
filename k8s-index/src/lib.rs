//! Builds the address-discovery publishers from Kubernetes resource events.
//!
//! This crate owns no informer machinery of its own: it exposes the
//! publisher types (`EndpointsWatcher`, `WorkloadWatcher`, `ClusterStore`,
//! and the auxiliary policy watchers) that the runtime layer feeds with
//! `kubert`-driven watch events and that a discovery-serving front end
//! subscribes to.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
mod cluster_store;
mod endpoints;
mod metrics;
mod named_ports;
mod opaque_ports;
mod owner_chain;
mod ports;
mod profile;
mod server_match;
mod server_watcher;
mod traffic_split;
mod workload;

pub use self::{
    cluster_info::ClusterInfo,
    cluster_store::{ClusterConfig, ClusterStore, DecodeKubeconfig, KubeconfigDecoder, LOCAL_CLUSTER_NAME},
    endpoints::{DiscoveryMode, EndpointsWatcher},
    metrics::WatcherMetrics,
    opaque_ports::OpaquePortsWatcher,
    owner_chain::{resolve as resolve_pod_owner_chain, Owner},
    ports::{parse_portset, PortSet},
    profile::ProfileWatcher,
    server_watcher::ServerWatcher,
    traffic_split::TrafficSplitWatcher,
    workload::WorkloadWatcher,
};
