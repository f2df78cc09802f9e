#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod external_workload;
pub mod labels;
pub mod policy;

pub use self::labels::Labels;
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            Container, ContainerPort, Endpoints, Namespace, Node, NodeSpec, Pod, PodSpec,
            PodStatus, Secret, Service, ServiceAccount, ServicePort, ServiceSpec,
        },
        apps::v1::ReplicaSet,
        discovery::v1::{Endpoint, EndpointConditions, EndpointHints, EndpointSlice, ForZone},
    },
    apimachinery::{
        self,
        pkg::{
            apis::meta::v1::{Condition, Time},
            util::intstr::IntOrString,
        },
    },
    ByteString, NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher::Event as WatchEvent,
    Client, Error,
};
