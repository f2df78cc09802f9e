//! `ClusterStore`: secret-driven cache of remote-cluster `EndpointsWatcher`s.
//!
//! One entry always exists under the reserved [`LOCAL_CLUSTER_NAME`] key,
//! inserted by the host for its own cluster. Every other entry is created
//! from a mirror-credential Secret and torn down when that Secret is
//! deleted or stops being eligible.

use std::sync::Arc;

use ahash::AHashMap;
use anyhow::{Context, Result};
use linkerd_discovery_k8s_api::{self as k8s, ResourceExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::warn;

use crate::endpoints::{DiscoveryMode, EndpointsWatcher};

pub const LOCAL_CLUSTER_NAME: &str = "local";

const MIRROR_SECRET_TYPE: &str = "mirror.linkerd.io/remote-kubeconfig";
const CLUSTER_NAME_LABEL: &str = "multicluster.linkerd.io/cluster-name";
const TRUST_DOMAIN_ANNOTATION: &str = "multicluster.linkerd.io/trust-domain";
const CLUSTER_DOMAIN_ANNOTATION: &str = "multicluster.linkerd.io/cluster-domain";
const KUBECONFIG_KEY: &str = "kubeconfig";

/// Per-remote-cluster configuration recovered from its mirror secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub trust_domain: String,
    pub cluster_domain: String,
}

/// Parses a mirror secret's kubeconfig blob into a usable client. Injected
/// so tests can exercise eligibility/lifecycle without a live apiserver.
#[async_trait::async_trait]
pub trait DecodeKubeconfig: Send + Sync + 'static {
    async fn decode(&self, kubeconfig: &[u8]) -> Result<k8s::Client>;
}

/// The production decoder: parses a kubeconfig YAML blob and builds a real
/// `kube::Client` from it.
#[derive(Clone, Copy, Default)]
pub struct KubeconfigDecoder;

#[async_trait::async_trait]
impl DecodeKubeconfig for KubeconfigDecoder {
    async fn decode(&self, kubeconfig: &[u8]) -> Result<k8s::Client> {
        let text = std::str::from_utf8(kubeconfig).context("mirror secret kubeconfig is not UTF-8")?;
        let config = kube::config::Kubeconfig::from_yaml(text).context("parsing kubeconfig")?;
        let options = kube::config::KubeConfigOptions::default();
        let client_config = kube::Config::from_custom_kubeconfig(config, &options)
            .await
            .context("resolving kubeconfig into a client config")?;
        let client = k8s::Client::try_from(client_config).context("building client from kubeconfig")?;
        Ok(client)
    }
}

struct Entry {
    watcher: Arc<EndpointsWatcher>,
    config: ClusterConfig,
    stop: watch::Sender<bool>,
}

pub struct ClusterStore<D = KubeconfigDecoder> {
    mode: DiscoveryMode,
    decode: D,
    entries: RwLock<AHashMap<String, Entry>>,
    /// Reverse index from a mirror secret's `(namespace, name)` to the
    /// cluster it last provisioned, so a bare delete event (which carries
    /// only a name) can still find the right entry to tear down.
    secret_owners: RwLock<AHashMap<(String, String), String>>,
}

impl<D: DecodeKubeconfig> ClusterStore<D> {
    pub fn new(mode: DiscoveryMode, decode: D) -> Self {
        Self {
            mode,
            decode,
            entries: RwLock::new(AHashMap::new()),
            secret_owners: RwLock::new(AHashMap::new()),
        }
    }

    /// Registers the host's own `EndpointsWatcher` under the reserved local
    /// cluster name. Not subject to the secret-driven lifecycle.
    pub fn add_local_watcher(&self, watcher: Arc<EndpointsWatcher>, config: ClusterConfig) {
        let (stop, _stopped) = watch::channel(false);
        self.entries.write().insert(
            LOCAL_CLUSTER_NAME.to_string(),
            Entry { watcher, config, stop },
        );
    }

    pub fn get_watcher(&self, cluster: &str) -> Option<Arc<EndpointsWatcher>> {
        self.entries.read().get(cluster).map(|e| e.watcher.clone())
    }

    pub fn get_local_watcher(&self) -> Option<Arc<EndpointsWatcher>> {
        self.get_watcher(LOCAL_CLUSTER_NAME)
    }

    pub fn get_cluster_config(&self, cluster: &str) -> Option<ClusterConfig> {
        self.entries.read().get(cluster).map(|e| e.config.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn eligible(secret: &k8s::Secret) -> Option<(String, String, String, Vec<u8>)> {
        if secret.type_.as_deref() != Some(MIRROR_SECRET_TYPE) {
            return None;
        }
        let cluster = secret.labels().get(CLUSTER_NAME_LABEL)?.clone();
        let trust_domain = secret.annotations().get(TRUST_DOMAIN_ANNOTATION)?.clone();
        let cluster_domain = secret.annotations().get(CLUSTER_DOMAIN_ANNOTATION)?.clone();
        let kubeconfig = secret.data.as_ref()?.get(KUBECONFIG_KEY)?.0.clone();
        Some((cluster, trust_domain, cluster_domain, kubeconfig))
    }

    /// Handles an add/update of a mirror secret. A `DeletedFinalStateUnknown`
    /// tombstone must be unwrapped by the caller before this is invoked.
    pub async fn apply_secret(&self, secret: k8s::Secret) {
        let Some((cluster, trust_domain, cluster_domain, kubeconfig)) = Self::eligible(&secret) else {
            return;
        };
        if cluster == LOCAL_CLUSTER_NAME {
            warn!(%cluster, "mirror secret uses the reserved local cluster name, ignoring");
            return;
        }

        let client = match self.decode.decode(&kubeconfig).await {
            Ok(client) => client,
            Err(error) => {
                warn!(%cluster, %error, "failed to build a client from mirror secret");
                return;
            }
        };

        let watcher = Arc::new(EndpointsWatcher::new(self.mode, cluster.clone(), Some(client)));
        let (stop, _stopped) = watch::channel(false);
        let config = ClusterConfig {
            trust_domain,
            cluster_domain,
        };

        let secret_namespace = secret.namespace().unwrap_or_default();
        let secret_name = secret.name_any();
        self.secret_owners
            .write()
            .insert((secret_namespace, secret_name), cluster.clone());

        // A prior generation of this cluster's credentials is torn down
        // before the new entry is inserted, so there's never more than one
        // live watcher per cluster name.
        self.remove(&cluster);
        self.entries
            .write()
            .insert(cluster, Entry { watcher, config, stop });
    }

    /// Handles the deletion of a mirror secret, consulting the reverse index
    /// recorded at apply-time since a bare delete event carries only a name.
    pub fn delete_secret(&self, namespace: String, name: String) {
        let Some(cluster) = self.secret_owners.write().remove(&(namespace, name)) else {
            return;
        };
        self.remove(&cluster);
    }

    /// Removes a cluster's entry in the fixed order the lifecycle requires:
    /// drop it from the map, stop its watcher's handlers, then signal its
    /// informers to close. Never touches the reserved local entry.
    fn remove(&self, cluster: &str) {
        if cluster == LOCAL_CLUSTER_NAME {
            return;
        }
        let entry = self.entries.write().remove(cluster);
        if let Some(entry) = entry {
            entry.watcher.stop();
            let _ = entry.stop.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::ObjectMeta;
    use std::collections::BTreeMap;

    struct FakeDecoder;

    #[async_trait::async_trait]
    impl DecodeKubeconfig for FakeDecoder {
        async fn decode(&self, _kubeconfig: &[u8]) -> Result<k8s::Client> {
            anyhow::bail!("no live apiserver in tests")
        }
    }

    fn mirror_secret(cluster: &str) -> k8s::Secret {
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster.to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert(TRUST_DOMAIN_ANNOTATION.to_string(), "cluster.local".to_string());
        annotations.insert(CLUSTER_DOMAIN_ANNOTATION.to_string(), "cluster.local".to_string());
        let mut data = BTreeMap::new();
        data.insert(
            KUBECONFIG_KEY.to_string(),
            k8s::ByteString(b"apiVersion: v1".to_vec()),
        );
        k8s::Secret {
            metadata: ObjectMeta {
                namespace: Some("linkerd-multicluster".to_string()),
                name: Some(format!("{cluster}-secret")),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            type_: Some(MIRROR_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn ineligible_secrets_are_ignored() {
        let store = ClusterStore::new(DiscoveryMode::EndpointSlice, FakeDecoder);
        let mut not_mirror = mirror_secret("east");
        not_mirror.type_ = Some("Opaque".to_string());
        assert!(ClusterStore::<FakeDecoder>::eligible(&not_mirror).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn failed_decode_leaves_store_unchanged() {
        let store = ClusterStore::new(DiscoveryMode::EndpointSlice, FakeDecoder);
        store.apply_secret(mirror_secret("east")).await;
        assert!(store.get_watcher("east").is_none());
    }

    #[test]
    fn local_watcher_is_reserved_and_never_removed() {
        let store = ClusterStore::new(DiscoveryMode::EndpointSlice, FakeDecoder);
        let watcher = Arc::new(EndpointsWatcher::new(
            DiscoveryMode::EndpointSlice,
            LOCAL_CLUSTER_NAME,
            None,
        ));
        store.add_local_watcher(
            watcher,
            ClusterConfig {
                trust_domain: "cluster.local".to_string(),
                cluster_domain: "cluster.local".to_string(),
            },
        );
        assert!(store.get_local_watcher().is_some());
        store.remove(LOCAL_CLUSTER_NAME);
        assert!(store.get_local_watcher().is_some());
    }

    #[test]
    fn reserved_name_from_a_secret_is_rejected() {
        let secret = mirror_secret(LOCAL_CLUSTER_NAME);
        let (cluster, ..) = ClusterStore::<FakeDecoder>::eligible(&secret).expect("eligible");
        assert_eq!(cluster, LOCAL_CLUSTER_NAME);
    }
}
