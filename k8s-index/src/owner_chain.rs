//! Collapses a pod's ownership chain to its leaf controller.
//!
//! Pods are almost always owned directly by a `ReplicaSet`, which is in turn
//! owned by a `Deployment` — two hops that should present to subscribers as
//! a single `(Deployment, name)` pair. Other owners (`StatefulSet`,
//! `DaemonSet`, `Job`, ...) are used as-is: there is no second hop to
//! collapse.

use linkerd_discovery_k8s_api::{self as k8s, ResourceExt};

/// The resolved leaf controller above a pod or workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Owner {
    pub kind: String,
    pub name: String,
}

fn controller_ref(refs: &[k8s::apimachinery::pkg::apis::meta::v1::OwnerReference]) -> Option<&k8s::apimachinery::pkg::apis::meta::v1::OwnerReference> {
    refs.iter().find(|r| r.controller == Some(true))
}

/// Resolves the leaf controller for a pod's owner references.
///
/// Only a single metadata-only lookup is performed (for the `ReplicaSet`
/// case); every other owner kind is returned without a network call.
pub async fn resolve(
    client: &k8s::Client,
    namespace: &str,
    owner_refs: &[k8s::apimachinery::pkg::apis::meta::v1::OwnerReference],
) -> Option<Owner> {
    let owner = controller_ref(owner_refs)?;
    if owner.kind != "ReplicaSet" {
        return Some(Owner {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
        });
    }

    let api: k8s::Api<k8s::ReplicaSet> = k8s::Api::namespaced(client.clone(), namespace);
    match api.get_metadata(&owner.name).await {
        Ok(rs) => {
            let refs = rs.owner_references();
            match controller_ref(refs) {
                Some(grandparent) => Some(Owner {
                    kind: grandparent.kind.clone(),
                    name: grandparent.name.clone(),
                }),
                None => Some(Owner {
                    kind: owner.kind.clone(),
                    name: owner.name.clone(),
                }),
            }
        }
        Err(error) => {
            tracing::info!(%error, replicaset = %owner.name, namespace, "failed to resolve replicaset owner");
            Some(Owner {
                kind: owner.kind.clone(),
                name: owner.name.clone(),
            })
        }
    }
}
