//! Tests for test selection
//!
//! These tests verify resolution precedence over the builtin registry.

use netdiag::registry::{Selection, TestRegistry};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_builtin_catalogue_order() {
    let registry = TestRegistry::builtin().unwrap();
    assert_eq!(
        registry.ids(),
        strings(&[
            "pod-to-pod",
            "service-to-pod",
            "cross-node",
            "dns",
            "nodeport",
            "loadbalancer",
            "api-server",
            "node-readiness",
        ])
    );
}

#[test]
fn test_every_group_member_is_registered() {
    let registry = TestRegistry::builtin().unwrap();
    for name in registry.group_names() {
        for id in registry.group(name).unwrap() {
            assert!(registry.contains(id), "group {name} lists unknown {id}");
        }
    }
}

#[test]
fn test_group_beats_list_beats_default() {
    let registry = TestRegistry::builtin().unwrap();

    let group = registry.resolve(&Selection {
        group: Some("cluster".to_string()),
        list: strings(&["dns"]),
        ..Default::default()
    });
    assert_eq!(group.ids, strings(&["api-server", "node-readiness"]));

    let list = registry.resolve(&Selection {
        list: strings(&["dns", "pod-to-pod"]),
        ..Default::default()
    });
    assert_eq!(list.ids, strings(&["dns", "pod-to-pod"]));

    let default = registry.resolve(&Selection::default());
    assert_eq!(default.ids, registry.default_ids());
}

#[test]
fn test_all_literal_is_full_set() {
    let registry = TestRegistry::builtin().unwrap();
    let resolution = registry.resolve(&Selection {
        list: strings(&["all"]),
        ..Default::default()
    });
    assert_eq!(resolution.ids, registry.ids());
}

#[test]
fn test_unknown_group_single_warning() {
    let registry = TestRegistry::builtin().unwrap();
    let resolution = registry.resolve(&Selection {
        group: Some("storage".to_string()),
        ..Default::default()
    });
    assert_eq!(resolution.ids, registry.default_ids());
    assert_eq!(resolution.warnings.len(), 1);
}

#[test]
fn test_unknown_list_entry_skipped() {
    let registry = TestRegistry::builtin().unwrap();
    let resolution = registry.resolve(&Selection {
        list: strings(&["dns", "ingress", "nodeport"]),
        ..Default::default()
    });
    assert_eq!(resolution.ids, strings(&["dns", "nodeport"]));
    assert_eq!(resolution.warnings.len(), 1);
    assert!(resolution.warnings[0].contains("ingress"));
}
