use std::net::IpAddr;

use ahash::AHashMap;

use crate::ids::{AddressId, ExternalWorkloadId, PodId};

/// A topology zone name, as carried by EndpointSlice endpoint hints.
pub type Zone = String;

/// One resolved endpoint backing a subscription.
///
/// `pod` and `workload` are mutually exclusive: an address derived from a
/// bare mirrored endpoint (no `TargetRef`) carries neither.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,

    pub pod: Option<PodId>,
    pub workload: Option<ExternalWorkloadId>,

    /// The leaf controller above the pod/workload in its ownership chain
    /// (e.g. "replicaset", "statefulset"), or empty if none was resolved.
    pub owner_kind: String,
    pub owner_name: String,

    /// Spiffe-like mesh identity, or empty if the endpoint is unmeshed.
    pub identity: String,

    /// Overrides the outbound authority for mirrored cross-cluster
    /// services; empty when not applicable.
    pub authority_override: String,

    pub zone: Option<Zone>,
    pub for_zones: Vec<Zone>,

    pub opaque_protocol: bool,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            pod: None,
            workload: None,
            owner_kind: String::new(),
            owner_name: String::new(),
            identity: String::new(),
            authority_override: String::new(),
            zone: None,
            for_zones: Vec::new(),
            opaque_protocol: false,
        }
    }
}

/// The fundamental snapshot value: every address currently backing a
/// subscription, plus the service-level attributes that apply uniformly to
/// all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressSet {
    pub addresses: AHashMap<AddressId, Address>,
    pub labels: AHashMap<String, String>,
    pub local_traffic_policy: bool,
    /// "local" for the controller's own cluster, otherwise a remote-cluster
    /// key matching a `ClusterStore` entry.
    pub cluster: String,
}

impl AddressSet {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            addresses: AHashMap::new(),
            labels: AHashMap::new(),
            local_traffic_policy: false,
            cluster: cluster.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Removes every address whose id was contributed by a specific source
    /// (e.g. a single EndpointSlice) before merging its replacement in.
    pub fn remove_all(&mut self, ids: impl IntoIterator<Item = AddressId>) {
        for id in ids {
            self.addresses.remove(&id);
        }
    }

    pub fn merge(&mut self, other: impl IntoIterator<Item = (AddressId, Address)>) {
        self.addresses.extend(other);
    }
}
