//! Shared fixtures for integration tests

use std::time::Duration;

use rand::Rng;

use kindle::crd::{Cluster, ClusterSpec, MachineConfig, NodePoolSpec};
use kindle::provider::{DockerProvider, DockerProviderConfig, Provider};

/// Kubernetes version used for node images in tests
pub const TEST_KUBERNETES_VERSION: &str = "v1.31.0";

/// Build a cluster with one control-plane node and `workers` workers
pub fn sample_cluster(name: &str, workers: u32) -> Cluster {
    let machine_config = MachineConfig {
        memory: "1Gi".to_string(),
        cpu_count: 1,
    };
    Cluster::new(
        name,
        ClusterSpec {
            kubernetes_version: TEST_KUBERNETES_VERSION.to_string(),
            control_plane: NodePoolSpec {
                count: 1,
                machine_config: machine_config.clone(),
            },
            workers: NodePoolSpec {
                count: workers,
                machine_config,
            },
        },
    )
}

/// Random cluster name so parallel or aborted runs never collide
pub fn unique_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{prefix}-{suffix:06}")
}

/// Connect to the local Docker daemon with a test-only network range
pub async fn connect_provider() -> DockerProvider {
    let yaml = r#"
network:
  cidr: 10.231.0.0/16
"#;
    let overrides = DockerProviderConfig::from_yaml(yaml).expect("test config parses");
    let mut config = DockerProviderConfig::default().merge_with(&overrides);
    config.validate().expect("test config is valid");

    DockerProvider::connect(config, Duration::from_secs(300))
        .await
        .expect("Docker daemon must be reachable for these tests")
}

/// Remove a cluster's resources, ignoring errors
pub async fn cleanup_cluster(provider: &DockerProvider, cluster: &Cluster) {
    let _ = provider.delete_cluster(cluster).await;
}
