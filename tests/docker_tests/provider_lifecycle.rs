//! Integration tests for the Docker provider
//!
//! These tests tell the story of a cluster's infrastructure from creation to
//! teardown against a real Docker daemon. Each test uses a random cluster
//! name and cleans up after itself.

use kindle::provider::{ObservedPhase, Provider};
use kindle::Error;

use super::helpers::{cleanup_cluster, connect_provider, sample_cluster, unique_name};

/// Story: A new cluster comes up with every node running, and deleting it
/// leaves nothing behind
#[tokio::test]
#[ignore = "requires Docker"]
async fn story_create_observe_delete() {
    let provider = connect_provider().await;
    let cluster = sample_cluster(&unique_name("e2e-life"), 1);

    provider.create_cluster(&cluster).await.unwrap();

    let health = provider.get_cluster_status(&cluster).await.unwrap();
    assert_eq!(health.phase, ObservedPhase::Running, "{}", health.message);
    assert!(health.control_plane_ready);
    assert_eq!(health.workers_ready, 1);

    provider.delete_cluster(&cluster).await.unwrap();

    let health = provider.get_cluster_status(&cluster).await.unwrap();
    assert_eq!(health.phase, ObservedPhase::NotFound);
}

/// Story: Creating the same cluster twice is refused instead of duplicating
/// nodes
#[tokio::test]
#[ignore = "requires Docker"]
async fn story_duplicate_create_is_refused() {
    let provider = connect_provider().await;
    let cluster = sample_cluster(&unique_name("e2e-dup"), 0);

    provider.create_cluster(&cluster).await.unwrap();
    let result = provider.create_cluster(&cluster).await;
    cleanup_cluster(&provider, &cluster).await;

    assert!(matches!(result, Err(Error::ClusterExists(_))));
}

/// Story: Worker count changes converge in both directions
#[tokio::test]
#[ignore = "requires Docker"]
async fn story_scale_workers_up_and_down() {
    let provider = connect_provider().await;
    let mut cluster = sample_cluster(&unique_name("e2e-scale"), 1);
    provider.create_cluster(&cluster).await.unwrap();

    cluster.spec.workers.count = 2;
    let observed = provider.get_cluster_status(&cluster).await.unwrap();
    assert_eq!(observed.phase, ObservedPhase::Pending);

    provider.update_cluster(&cluster).await.unwrap();
    let health = provider.get_cluster_status(&cluster).await.unwrap();
    assert_eq!(health.workers_ready, 2);
    assert_eq!(health.phase, ObservedPhase::Running);

    cluster.spec.workers.count = 0;
    provider.update_cluster(&cluster).await.unwrap();
    let health = provider.get_cluster_status(&cluster).await.unwrap();

    cleanup_cluster(&provider, &cluster).await;
    assert_eq!(health.workers_ready, 0);
    assert_eq!(health.phase, ObservedPhase::Running);
}

/// Story: Deleting a cluster that never existed succeeds
#[tokio::test]
#[ignore = "requires Docker"]
async fn story_delete_missing_cluster_is_a_no_op() {
    let provider = connect_provider().await;
    let cluster = sample_cluster(&unique_name("e2e-ghost"), 0);

    provider.delete_cluster(&cluster).await.unwrap();
}

/// Story: Updating a cluster with no nodes reports it missing
#[tokio::test]
#[ignore = "requires Docker"]
async fn story_update_missing_cluster_is_not_found() {
    let provider = connect_provider().await;
    let cluster = sample_cluster(&unique_name("e2e-missing"), 1);

    let result = provider.update_cluster(&cluster).await;
    assert!(matches!(result, Err(Error::ClusterNotFound(_))));
}
