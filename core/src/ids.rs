use std::fmt;

/// IP family, used to disambiguate dual-stack pods and EndpointSlices that
/// otherwise share a namespace/name.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum IpFamily {
    V4,
    V6,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ServiceId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
    pub ip_family: IpFamily,
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.name, self.namespace, self.ip_family)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ExternalWorkloadId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ExternalWorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProfileId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

/// An IP:port pair, used as the cache key for `WorkloadWatcher` subscriptions.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IpPort {
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl fmt::Display for IpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The tagged key under which one `Address` is stored in an `AddressSet`.
///
/// Bare mirrored endpoints carry neither a pod nor a workload reference, so
/// their identity falls back to the `(service, ip, port)` triple — this is
/// what keeps multiple unnamed mirrored endpoints on one service from
/// colliding in the map.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum AddressId {
    Pod(PodId),
    Workload(ExternalWorkloadId),
    Service {
        service: ServiceId,
        ip: std::net::IpAddr,
        port: u16,
    },
}

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod(id) => write!(f, "pod:{id}"),
            Self::Workload(id) => write!(f, "workload:{id}"),
            Self::Service { service, ip, port } => write!(f, "svc:{service}:{ip}:{port}"),
        }
    }
}
