use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::runtime::watcher;
use linkerd_discovery_k8s_api::{self as k8s};
use linkerd_discovery_k8s_index::{
    parse_portset, ClusterConfig, ClusterStore, DiscoveryMode, EndpointsWatcher,
    KubeconfigDecoder, OpaquePortsWatcher, PortSet, ProfileWatcher, ServerWatcher,
    TrafficSplitWatcher, WatcherMetrics, WorkloadWatcher, LOCAL_CLUSTER_NAME,
};
use prometheus_client::registry::Registry;
use tracing::{info_span, Instrument};

use crate::indexers::{
    EndpointSliceIndexer, EndpointsIndexer, ExternalWorkloadIndexer, PodIndexer, ProfileIndexer,
    SecretIndexer, ServerIndexer, ServiceIndexer, TrafficSplitIndexer,
};

const MIRROR_SECRET_CLUSTER_NAME_LABEL: &str = "multicluster.linkerd.io/cluster-name";

#[derive(Debug, Parser)]
#[clap(name = "linkerd-discovery", about = "The linkerd endpoint-discovery controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "linkerd=info,warn",
        env = "LINKERD_DISCOVERY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Network CIDRs of pod IPs, used to distinguish in-cluster from
    /// out-of-cluster addresses.
    #[clap(
        long,
        default_value = "10.0.0.0/8,100.64.0.0/10,172.16.0.0/12,192.168.0.0/16"
    )]
    cluster_networks: IpNets,

    #[clap(long, default_value = "cluster.local")]
    identity_domain: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    #[clap(long, default_value = "linkerd")]
    control_plane_namespace: String,

    /// Whether EndpointSlice or the older Endpoints resource should be
    /// watched to resolve service backends.
    #[clap(long, default_value = "endpoint-slice")]
    discovery_mode: DiscoveryModeArg,

    #[clap(long, default_value = "")]
    default_opaque_ports: String,

    /// Whether a pod that stops `Running` (without being deleted) should
    /// have its addresses dropped from publishers immediately, rather than
    /// lingering until the next apply. See `WorkloadWatcher::apply_pod`.
    #[clap(long, default_value = "true")]
    clear_addresses_on_not_running: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DiscoveryModeArg {
    Endpoints,
    EndpointSlice,
}

impl From<DiscoveryModeArg> for DiscoveryMode {
    fn from(mode: DiscoveryModeArg) -> Self {
        match mode {
            DiscoveryModeArg::Endpoints => DiscoveryMode::Endpoints,
            DiscoveryModeArg::EndpointSlice => DiscoveryMode::EndpointSlice,
        }
    }
}

#[derive(Clone, Debug)]
struct IpNets(Vec<ipnet::IpNet>);

impl std::str::FromStr for IpNets {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(|n| n.parse().map_err(Into::into))
            .collect::<Result<Vec<ipnet::IpNet>>>()
            .map(Self)
    }
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            cluster_networks: IpNets(_cluster_networks),
            identity_domain,
            cluster_domain,
            control_plane_namespace: _,
            discovery_mode,
            default_opaque_ports,
            clear_addresses_on_not_running,
        } = self;

        let mode = DiscoveryMode::from(discovery_mode);
        let default_opaque_ports: PortSet = parse_portset(&default_opaque_ports)?;

        let mut prom = <Registry>::default();

        let endpoints = Arc::new(EndpointsWatcher::new(mode, LOCAL_CLUSTER_NAME, None));
        let workload = Arc::new(WorkloadWatcher::new(
            default_opaque_ports.clone(),
            clear_addresses_on_not_running,
        ));
        let opaque_ports = Arc::new(OpaquePortsWatcher::new(default_opaque_ports));
        let servers = Arc::new(ServerWatcher::new());
        let profiles = Arc::new(ProfileWatcher::new());
        let splits = Arc::new(TrafficSplitWatcher::new());
        let clusters = Arc::new(ClusterStore::new(mode, KubeconfigDecoder));
        clusters.add_local_watcher(
            endpoints.clone(),
            ClusterConfig {
                trust_domain: identity_domain,
                cluster_domain,
            },
        );

        let endpoints_metrics = Arc::new(WatcherMetrics::register(
            "endpoints_watcher",
            prom.sub_registry_with_prefix("endpoints_watcher"),
        ));
        let workload_metrics = Arc::new(WatcherMetrics::register(
            "workload_watcher",
            prom.sub_registry_with_prefix("workload_watcher"),
        ));
        let services_metrics = Arc::new(WatcherMetrics::register(
            "opaque_ports_watcher",
            prom.sub_registry_with_prefix("opaque_ports_watcher"),
        ));
        let servers_metrics = Arc::new(WatcherMetrics::register(
            "server_watcher",
            prom.sub_registry_with_prefix("server_watcher"),
        ));
        let profiles_metrics = Arc::new(WatcherMetrics::register(
            "profile_watcher",
            prom.sub_registry_with_prefix("profile_watcher"),
        ));
        let splits_metrics = Arc::new(WatcherMetrics::register(
            "traffic_split_watcher",
            prom.sub_registry_with_prefix("traffic_split_watcher"),
        ));
        let clusters_metrics = Arc::new(WatcherMetrics::register(
            "cluster_store",
            prom.sub_registry_with_prefix("cluster_store"),
        ));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                ServiceIndexer {
                    endpoints: endpoints.clone(),
                    opaque_ports: opaque_ports.clone(),
                    metrics: services_metrics,
                },
                services,
            )
            .instrument(info_span!("services")),
        );

        match mode {
            DiscoveryMode::Endpoints => {
                let eps = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(
                        EndpointsIndexer {
                            endpoints: endpoints.clone(),
                            workload: workload.clone(),
                            metrics: endpoints_metrics.clone(),
                        },
                        eps,
                    )
                    .instrument(info_span!("endpoints")),
                );
            }
            DiscoveryMode::EndpointSlice => {
                let slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(
                        EndpointSliceIndexer {
                            endpoints: endpoints.clone(),
                            workload: workload.clone(),
                            metrics: endpoints_metrics.clone(),
                        },
                        slices,
                    )
                    .instrument(info_span!("endpointslices")),
                );
            }
        }

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                PodIndexer {
                    endpoints: endpoints.clone(),
                    workload: workload.clone(),
                    metrics: endpoints_metrics.clone(),
                },
                pods,
            )
            .instrument(info_span!("pods")),
        );

        let external_workloads = runtime
            .watch_all::<k8s::external_workload::ExternalWorkload>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                ExternalWorkloadIndexer {
                    endpoints: endpoints.clone(),
                    workload: workload.clone(),
                    metrics: workload_metrics.clone(),
                },
                external_workloads,
            )
            .instrument(info_span!("externalworkloads")),
        );

        let policy_servers = runtime.watch_all::<k8s::policy::Server>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                ServerIndexer {
                    endpoints: endpoints.clone(),
                    workload: workload.clone(),
                    servers: servers.clone(),
                    metrics: servers_metrics,
                },
                policy_servers,
            )
            .instrument(info_span!("servers")),
        );

        let profile_resources =
            runtime.watch_all::<k8s::policy::ServiceProfile>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                ProfileIndexer {
                    profiles: profiles.clone(),
                    metrics: profiles_metrics,
                },
                profile_resources,
            )
            .instrument(info_span!("serviceprofiles")),
        );

        let traffic_splits =
            runtime.watch_all::<k8s::policy::TrafficSplit>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                TrafficSplitIndexer {
                    splits: splits.clone(),
                    metrics: splits_metrics,
                },
                traffic_splits,
            )
            .instrument(info_span!("trafficsplits")),
        );

        let mirror_secrets = runtime.watch_all::<k8s::Secret>(
            watcher::Config::default().labels(MIRROR_SECRET_CLUSTER_NAME_LABEL),
        );
        tokio::spawn(
            kubert::index::namespaced(
                SecretIndexer {
                    clusters: clusters.clone(),
                    metrics: clusters_metrics,
                },
                mirror_secrets,
            )
            .instrument(info_span!("secrets")),
        );

        if runtime.run().await.is_err() {
            anyhow::bail!("endpoint-discovery controller aborted");
        }

        Ok(())
    }
}
