//! Named-port resolution for pods and external workloads.
//!
//! A service port's `targetPort` may reference a container port by name
//! rather than number; opaque-ports annotations may do the same. Both cases
//! resolve through these helpers.

use linkerd_discovery_k8s_api as k8s;

/// Resolves a single named TCP container port on a pod, if present.
pub(crate) fn named_tcp_port(
    spec: Option<&k8s::api::core::v1::PodSpec>,
    name: &str,
) -> Option<std::num::NonZeroU16> {
    let spec = spec?;
    for container in &spec.containers {
        for port in container.ports.iter().flatten() {
            if port.name.as_deref() == Some(name)
                && matches!(port.protocol.as_deref(), None | Some("TCP"))
            {
                if let Ok(p) = u16::try_from(port.container_port) {
                    return std::num::NonZeroU16::try_from(p).ok();
                }
            }
        }
    }
    None
}

/// Resolves a single named TCP port on an `ExternalWorkload`, if present.
pub(crate) fn named_workload_port(
    spec: &k8s::external_workload::ExternalWorkloadSpec,
    name: &str,
) -> Option<std::num::NonZeroU16> {
    spec.ports
        .iter()
        .flatten()
        .find(|p| p.name.as_deref() == Some(name) && matches!(p.protocol.as_deref(), None | Some("TCP")))
        .map(|p| p.port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1::{Container, ContainerPort, PodSpec};

    fn pod_spec(ports: Vec<ContainerPort>) -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ports: Some(ports),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn resolves_named_tcp_port() {
        let spec = pod_spec(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: 8080,
            protocol: None,
            ..Default::default()
        }]);
        assert_eq!(
            named_tcp_port(Some(&spec), "http"),
            std::num::NonZeroU16::new(8080)
        );
        assert_eq!(named_tcp_port(Some(&spec), "admin"), None);
    }

    #[test]
    fn skips_non_tcp_named_ports() {
        let spec = pod_spec(vec![ContainerPort {
            name: Some("dns".to_string()),
            container_port: 53,
            protocol: Some("UDP".to_string()),
            ..Default::default()
        }]);
        assert_eq!(named_tcp_port(Some(&spec), "dns"), None);
    }
}
