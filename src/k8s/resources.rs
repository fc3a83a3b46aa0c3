//! Kubernetes resource builders for netdiag fixtures
//!
//! Functions to create Pod and Service specs for the diagnostic checks,
//! plus small readers over the status fields the checks depend on.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Endpoints, HTTPGetAction, Node, Pod, PodSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Port the server fixture listens on
pub const SERVER_PORT: i32 = 8080;

/// Port exposed by fixture services
pub const SERVICE_PORT: i32 = 80;

/// Body served by the server fixture
pub const SERVER_RESPONSE: &str = "netdiag-ok";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "netdiag";
pub const CHECK_LABEL: &str = "netdiag.io/check";
pub const RUN_LABEL: &str = "netdiag.io/run";
pub const FIXTURE_LABEL: &str = "netdiag.io/fixture";

/// Kind of service fronting a server fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    ClusterIp,
    NodePort,
    LoadBalancer,
}

impl ServiceKind {
    fn as_k8s(&self) -> &'static str {
        match self {
            ServiceKind::ClusterIp => "ClusterIP",
            ServiceKind::NodePort => "NodePort",
            ServiceKind::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Collision-free fixture name: `nd-<check>-<role>-<8 hex chars>`
pub fn fixture_name(check_id: &str, role: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("nd-{}-{}-{}", check_id, role, &suffix[..8]).to_lowercase()
}

/// Labels carried by every fixture of a run
pub fn fixture_labels(check_id: &str, run_id: &str, name: &str) -> BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (CHECK_LABEL.to_string(), check_id.to_string()),
        (RUN_LABEL.to_string(), run_id.to_string()),
        (FIXTURE_LABEL.to_string(), name.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Labels for the test namespace itself
pub fn namespace_labels() -> BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        ("netdiag.io/type".to_string(), "diagnostic".to_string()),
    ]
    .into_iter()
    .collect()
}

/// Pod serving `SERVER_RESPONSE` over HTTP on `SERVER_PORT`
pub fn server_pod(
    name: &str,
    labels: BTreeMap<String, String>,
    image: &str,
    node_name: Option<&str>,
) -> Pod {
    let script = format!(
        "mkdir -p /www && echo {} > /www/index.html && exec httpd -f -p {} -h /www",
        SERVER_RESPONSE, SERVER_PORT
    );

    let container = Container {
        name: "server".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["/bin/sh".to_string()]),
        args: Some(vec!["-c".to_string(), script]),
        ports: Some(vec![ContainerPort {
            container_port: SERVER_PORT,
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".to_string()),
                port: IntOrString::Int(SERVER_PORT),
                ..Default::default()
            }),
            period_seconds: Some(2),
            ..Default::default()
        }),
        resources: Some(small_resources()),
        ..Default::default()
    };

    fixture_pod(name, labels, container, node_name)
}

/// Idle pod used as the source of probes
pub fn client_pod(
    name: &str,
    labels: BTreeMap<String, String>,
    image: &str,
    node_name: Option<&str>,
) -> Pod {
    let container = Container {
        name: "client".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        // Keep the container running with a sleep command
        command: Some(vec!["/bin/sh".to_string()]),
        args: Some(vec![
            "-c".to_string(),
            "trap 'exit 0' TERM; while true; do sleep 1; done".to_string(),
        ]),
        resources: Some(small_resources()),
        ..Default::default()
    };

    fixture_pod(name, labels, container, node_name)
}

fn fixture_pod(
    name: &str,
    labels: BTreeMap<String, String>,
    container: Container,
    node_name: Option<&str>,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            node_name: node_name.map(str::to_string),
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(1),
            dns_policy: Some("ClusterFirst".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn small_resources() -> ResourceRequirements {
    let limits: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("100m".to_string())),
        ("memory".to_string(), Quantity("64Mi".to_string())),
    ]
    .into_iter()
    .collect();
    let requests: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity("10m".to_string())),
        ("memory".to_string(), Quantity("16Mi".to_string())),
    ]
    .into_iter()
    .collect();

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

/// Service exposing `SERVICE_PORT` -> `SERVER_PORT`
///
/// A `None` selector produces a selector-less service, which still gets a
/// cluster IP and a DNS record.
pub fn service(
    name: &str,
    labels: BTreeMap<String, String>,
    selector: Option<BTreeMap<String, String>>,
    kind: ServiceKind,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector,
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(SERVER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some(kind.as_k8s().to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Selector matching exactly one fixture
pub fn fixture_selector(name: &str) -> BTreeMap<String, String> {
    [(FIXTURE_LABEL.to_string(), name.to_string())]
        .into_iter()
        .collect()
}

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

pub fn pod_node(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

/// Pod is Running and every container reports ready
pub fn pod_is_ready(pod: &Pod) -> bool {
    if pod_phase(pod) != Some("Running") {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().all(|c| c.ready))
        .unwrap_or(false)
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("unknown")
}

/// Node reports the `Ready` condition as `True`
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Node accepts ordinary workloads: not cordoned, no NoSchedule/NoExecute taint
pub fn node_is_schedulable(node: &Node) -> bool {
    let Some(spec) = node.spec.as_ref() else {
        return true;
    };
    if spec.unschedulable == Some(true) {
        return false;
    }
    !spec
        .taints
        .as_ref()
        .map(|taints| {
            taints
                .iter()
                .any(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
        })
        .unwrap_or(false)
}

/// First `InternalIP` address of a node
pub fn node_internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.as_str())
}

pub fn service_cluster_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
}

pub fn service_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|p| p.node_port)
}

/// First LoadBalancer ingress address, IP preferred over hostname
pub fn service_lb_ingress(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()))
}

/// Number of ready addresses across all endpoint subsets
pub fn ready_endpoint_count(endpoints: &Endpoints) -> usize {
    endpoints
        .subsets
        .as_ref()
        .map(|subsets| {
            subsets
                .iter()
                .map(|s| s.addresses.as_ref().map(Vec::len).unwrap_or(0))
                .sum()
        })
        .unwrap_or(0)
}
