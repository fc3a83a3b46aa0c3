//! netdiag - Kubernetes connectivity diagnostics
//!
//! Provisions short-lived workloads in a test namespace, exercises the
//! cluster's network paths (pod-to-pod, services, cross-node, DNS, NodePort,
//! LoadBalancer), scores each path and persists a JSON report of the run.

pub mod checks;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod k8s;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod report;

pub use error::{Error, Result};
