use crate::ports::PortSet;

/// Holds the local cluster's configuration, as supplied on the command line.
///
/// Remote-cluster equivalents (`trust_domain`/`cluster_domain`) are read from
/// the mirror-credential secret instead; see `cluster_store`.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The namespace where the linkerd control plane is deployed.
    pub control_plane_ns: String,

    /// E.g. "cluster.local".
    pub dns_domain: String,

    /// The cluster's mesh identity trust domain.
    pub identity_domain: String,

    /// The process-wide default set of ports to be marked opaque, used when
    /// a service/pod/workload carries no opaque-ports annotation of its own.
    pub default_opaque_ports: PortSet,
}
