use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An SMI TrafficSplit, consumed by `TrafficSplitWatcher` and keyed by its
/// apex service name (`spec.service`).
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "split.smi-spec.io",
    version = "v1alpha2",
    kind = "TrafficSplit",
    namespaced
)]
pub struct TrafficSplitSpec {
    pub service: String,
    pub backends: Vec<TrafficSplitBackend>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct TrafficSplitBackend {
    pub service: String,
    pub weight: u32,
}
