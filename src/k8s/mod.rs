//! Kubernetes integration module for netdiag
//!
//! This module handles all interactions with the cluster:
//! - The `ClusterOps` boundary and its kube-backed implementation
//! - Builders for the pods and services the checks deploy
//! - Bounded waits on pod, endpoint and load balancer readiness

mod client;
pub mod resources;
pub mod wait;

pub use client::{
    kubeconfig_path, ClusterOps, ExecOutput, K8sClient, NamespaceOutcome,
};

#[cfg(test)]
pub use client::MockClusterOps;
