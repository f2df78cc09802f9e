//! Shared pod/workload ↔ `Server` matching, used by both `EndpointsWatcher`
//! (opaque-protocol tagging) and `ServerWatcher` (direct `(pod, port)`
//! subscriptions).

use linkerd_discovery_k8s_api::{self as k8s, policy::server::Port};

use crate::named_ports;

/// True if `server` selects the given pod and resolves to `port`.
pub(crate) fn matches_pod(
    server_selector: &k8s::labels::Selector,
    server_port: &Port,
    pod_labels: &k8s::Labels,
    pod_spec: Option<&k8s::PodSpec>,
    port: u16,
) -> bool {
    if !server_selector.matches(pod_labels) {
        return false;
    }
    match server_port {
        Port::Number(n) => *n == port,
        Port::Name(name) => named_ports::named_tcp_port(pod_spec, name)
            .map(u16::from)
            .is_some_and(|p| p == port),
    }
}

/// True if `server` selects the given external workload and resolves to
/// `port`.
pub(crate) fn matches_workload(
    server_selector: &k8s::labels::Selector,
    server_port: &Port,
    workload_labels: &k8s::Labels,
    workload_spec: &k8s::external_workload::ExternalWorkloadSpec,
    port: u16,
) -> bool {
    if !server_selector.matches(workload_labels) {
        return false;
    }
    match server_port {
        Port::Number(n) => *n == port,
        Port::Name(name) => named_ports::named_workload_port(workload_spec, name)
            .map(u16::from)
            .is_some_and(|p| p == port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1::{Container, ContainerPort, PodSpec};
    use std::iter::FromIterator;

    #[test]
    fn numeric_port_matches_regardless_of_pod_spec() {
        let selector = k8s::labels::Selector::from_iter(Some(("app", "web")));
        let labels = k8s::Labels::from_iter(Some(("app", "web")));
        assert!(matches_pod(&selector, &Port::Number(80), &labels, None, 80));
        assert!(!matches_pod(&selector, &Port::Number(80), &labels, None, 81));
    }

    #[test]
    fn named_port_resolves_via_pod_spec() {
        let selector = k8s::labels::Selector::from_iter(Some(("app", "web")));
        let labels = k8s::Labels::from_iter(Some(("app", "web")));
        let spec = PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ports: Some(vec![ContainerPort {
                    name: Some("http".to_string()),
                    container_port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches_pod(
            &selector,
            &Port::Name("http".to_string()),
            &labels,
            Some(&spec),
            8080
        ));
    }

    #[test]
    fn non_matching_selector_never_matches() {
        let selector = k8s::labels::Selector::from_iter(Some(("app", "web")));
        let labels = k8s::Labels::from_iter(Some(("app", "other")));
        assert!(!matches_pod(&selector, &Port::Number(80), &labels, None, 80));
    }
}
