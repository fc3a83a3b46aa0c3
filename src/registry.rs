//! Test registry and selection
//!
//! The registry is an immutable table built once at startup: check id to
//! [`TestEntry`], plus named groups and the default subset. Groups are
//! validated when the table is built so a group can never name a missing
//! check.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::checks::{
    ApiServerCheck, Check, CrossNodeCheck, DnsCheck, LoadBalancerCheck, NodePortCheck,
    NodeReadinessCheck, PodToPodCheck, ServiceToPodCheck,
};
use crate::error::{Error, Result};

/// List value that expands to every registered check
pub const ALL: &str = "all";

/// A named, runnable check
#[derive(Clone)]
pub struct TestEntry {
    pub display_name: String,
    pub check: Arc<dyn Check>,
}

impl TestEntry {
    pub fn new(display_name: impl Into<String>, check: Arc<dyn Check>) -> Self {
        Self {
            display_name: display_name.into(),
            check,
        }
    }
}

impl std::fmt::Debug for TestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEntry")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// What the operator asked to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub test_all: bool,
    pub group: Option<String>,
    pub list: Vec<String>,
}

/// Resolved ids in execution order, plus anything worth telling the operator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub ids: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TestRegistry {
    entries: Vec<(String, TestEntry)>,
    groups: Vec<(String, Vec<String>)>,
    default: Vec<String>,
}

impl TestRegistry {
    /// Build a registry, rejecting duplicate ids and groups or defaults that
    /// reference unknown ids
    pub fn new(
        entries: Vec<(String, TestEntry)>,
        groups: Vec<(String, Vec<String>)>,
        default: Vec<String>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for (id, _) in &entries {
            if id == ALL {
                return Err(Error::config(format!("'{ALL}' is reserved and cannot be a test id")));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::config(format!("duplicate test id '{id}'")));
            }
        }

        let mut group_names = HashSet::new();
        for (group, members) in &groups {
            if !group_names.insert(group.as_str()) {
                return Err(Error::config(format!("duplicate test group '{group}'")));
            }
            if let Some(missing) = members.iter().find(|m| !seen.contains(m.as_str())) {
                return Err(Error::config(format!(
                    "test group '{group}' references unknown test '{missing}'"
                )));
            }
        }

        if let Some(missing) = default.iter().find(|m| !seen.contains(m.as_str())) {
            return Err(Error::config(format!(
                "default test set references unknown test '{missing}'"
            )));
        }

        Ok(Self {
            entries,
            groups,
            default,
        })
    }

    /// The checks shipped with netdiag
    pub fn builtin() -> Result<Self> {
        fn entry(id: &str, name: &str, check: Arc<dyn Check>) -> (String, TestEntry) {
            (id.to_string(), TestEntry::new(name, check))
        }
        fn ids(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        let entries = vec![
            entry("pod-to-pod", "Pod-to-Pod Connectivity", Arc::new(PodToPodCheck)),
            entry("service-to-pod", "Service-to-Pod Connectivity", Arc::new(ServiceToPodCheck)),
            entry("cross-node", "Cross-Node Connectivity", Arc::new(CrossNodeCheck)),
            entry("dns", "DNS Resolution", Arc::new(DnsCheck)),
            entry("nodeport", "NodePort Service", Arc::new(NodePortCheck)),
            entry("loadbalancer", "LoadBalancer Service", Arc::new(LoadBalancerCheck)),
            entry("api-server", "API Server Reachability", Arc::new(ApiServerCheck)),
            entry("node-readiness", "Node Readiness", Arc::new(NodeReadinessCheck)),
        ];

        let basic = ids(&["pod-to-pod", "service-to-pod", "dns"]);
        let groups = vec![
            (
                "networking".to_string(),
                ids(&[
                    "pod-to-pod",
                    "service-to-pod",
                    "cross-node",
                    "dns",
                    "nodeport",
                    "loadbalancer",
                ]),
            ),
            ("basic".to_string(), basic.clone()),
            (
                "services".to_string(),
                ids(&["service-to-pod", "nodeport", "loadbalancer"]),
            ),
            ("cluster".to_string(), ids(&["api-server", "node-readiness"])),
        ];

        Self::new(entries, groups, basic)
    }

    pub fn get(&self, id: &str) -> Option<&TestEntry> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every registered id in registry order
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, members)| members.as_slice())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn default_ids(&self) -> &[String] {
        &self.default
    }

    /// Turn a selection into the ordered ids to run
    ///
    /// `test_all` wins outright. Otherwise a known group beats the explicit
    /// list, which beats the default subset. An unknown group produces one
    /// warning and the default subset; unknown or repeated list ids are
    /// skipped with one warning each.
    pub fn resolve(&self, selection: &Selection) -> Resolution {
        if selection.test_all {
            return Resolution {
                ids: self.ids(),
                warnings: Vec::new(),
            };
        }

        if let Some(name) = selection.group.as_deref() {
            return match self.group(name) {
                Some(members) => Resolution {
                    ids: members.to_vec(),
                    warnings: Vec::new(),
                },
                None => {
                    let msg = format!(
                        "unknown test group '{name}' (known: {}), running default tests",
                        self.group_names().join(", ")
                    );
                    warn!(group = name, "Unknown test group");
                    Resolution {
                        ids: self.default.clone(),
                        warnings: vec![msg],
                    }
                }
            };
        }

        if selection.list.is_empty() {
            return Resolution {
                ids: self.default.clone(),
                warnings: Vec::new(),
            };
        }

        if selection.list.len() == 1 && selection.list[0].trim() == ALL {
            return Resolution {
                ids: self.ids(),
                warnings: Vec::new(),
            };
        }

        let mut resolution = Resolution::default();
        for raw in &selection.list {
            let id = raw.trim();
            if !self.contains(id) {
                warn!(test = id, "Unknown test id skipped");
                resolution
                    .warnings
                    .push(format!("unknown test '{id}' skipped"));
            } else if resolution.ids.iter().any(|seen| seen == id) {
                warn!(test = id, "Repeated test id skipped");
                resolution
                    .warnings
                    .push(format!("test '{id}' listed more than once, running it once"));
            } else {
                resolution.ids.push(id.to_string());
            }
        }
        resolution
    }
}
