//! Stories about the generated Cluster CRD

use kube::CustomResourceExt;

use kindle::crd::Cluster;

/// Story: The CRD is namespaced under the kindle.dev group with the short
/// name operators type
#[test]
fn story_crd_identity() {
    let crd = Cluster::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("clusters.kindle.dev"));
    assert_eq!(crd.spec.group, "kindle.dev");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.kind, "Cluster");
    assert_eq!(
        crd.spec.names.short_names.as_deref(),
        Some(&["kc".to_string()][..])
    );
}

/// Story: Status lives behind the status subresource so the controller's
/// writes never race spec edits
#[test]
fn story_crd_has_status_subresource() {
    let crd = Cluster::crd();
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
}

/// Story: `kindle --crd` output is valid YAML that round-trips the schema
#[test]
fn story_crd_serializes_to_yaml() {
    let yaml = serde_yaml::to_string(&Cluster::crd()).unwrap();
    assert!(yaml.contains("kubernetesVersion"));
    assert!(yaml.contains("controlPlane"));
    assert!(yaml.contains("machineConfig"));
    assert!(yaml.contains("cpuCount"));
}
