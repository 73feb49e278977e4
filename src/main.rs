//! kindle operator - Kubernetes-in-Docker cluster actuation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kindle::controller::{error_policy, reconcile, Context, ReconcileConfig};
use kindle::crd::Cluster;
use kindle::provider::{DockerProvider, DockerProviderConfig};

/// kindle - CRD-driven operator for multi-node Kubernetes-in-Docker clusters
#[derive(Parser, Debug)]
#[command(name = "kindle", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Cluster CRDs in every namespace and drives each one through
    /// its lifecycle on the local Docker daemon.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Path to the provider configuration YAML
    ///
    /// Values in the file override the built-in network and image defaults.
    #[arg(long, env = "KINDLE_PROVIDER_CONFIG")]
    provider_config: Option<PathBuf>,

    /// Status refresh interval for Running and Updating clusters
    #[arg(
        long,
        env = "KINDLE_RUNNING_REQUEUE_SECS",
        default_value_t = kindle::DEFAULT_RUNNING_REQUEUE_SECS
    )]
    running_requeue_secs: u64,

    /// Requeue interval for Failed clusters
    #[arg(
        long,
        env = "KINDLE_FAILED_REQUEUE_SECS",
        default_value_t = kindle::DEFAULT_FAILED_REQUEUE_SECS
    )]
    failed_requeue_secs: u64,

    /// Requeue interval after a retryable reconcile error
    #[arg(
        long,
        env = "KINDLE_ERROR_REQUEUE_SECS",
        default_value_t = kindle::DEFAULT_ERROR_REQUEUE_SECS
    )]
    error_requeue_secs: u64,

    /// Move Failed clusters back to Pending after the failed interval
    #[arg(long, env = "KINDLE_RETRY_FAILED")]
    retry_failed: bool,

    /// Timeout for Docker API calls in seconds
    #[arg(
        long,
        env = "KINDLE_RUNTIME_TIMEOUT_SECS",
        default_value_t = kindle::DEFAULT_RUNTIME_TIMEOUT_SECS
    )]
    runtime_timeout_secs: u64,
}

impl ControllerArgs {
    fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            running_requeue: Duration::from_secs(self.running_requeue_secs),
            failed_requeue: Duration::from_secs(self.failed_requeue_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            retry_failed: self.retry_failed,
            ..Default::default()
        }
    }

    fn provider_config(&self) -> anyhow::Result<DockerProviderConfig> {
        match &self.provider_config {
            Some(path) => DockerProviderConfig::load(path).map_err(|e| {
                anyhow::anyhow!("Failed to load provider config {}: {}", path.display(), e)
            }),
            None => {
                let mut config = DockerProviderConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Cluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::parse_from(["controller"]),
    };
    run_controller(args).await
}

/// Install or update the Cluster CRD with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinition,
    };
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(kindle::FIELD_MANAGER).force();

    tracing::info!("Installing Cluster CRD...");
    crds.patch(
        "clusters.kindle.dev",
        &params,
        &Patch::Apply(&Cluster::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Cluster CRD: {}", e))?;

    tracing::info!("Cluster CRD installed/updated");
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("kindle controller starting...");

    let provider_config = args.provider_config()?;
    let reconcile_config = args.reconcile_config();

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup
    ensure_crds_installed(&client).await?;

    // Refuse to start without a reachable Docker daemon
    let provider = DockerProvider::connect(
        provider_config,
        Duration::from_secs(args.runtime_timeout_secs),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Docker runtime unavailable: {}", e))?;
    tracing::info!(
        image_family = provider.config().image_family(),
        cidr = %provider.config().network.cidr,
        "Docker provider ready"
    );

    let ctx = Arc::new(
        Context::builder(client.clone(), Arc::new(provider))
            .config(reconcile_config)
            .build(),
    );

    let clusters: Api<Cluster> = Api::all(client);

    tracing::info!("Starting Cluster controller...");
    Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Cluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Cluster reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("kindle controller shutting down");
    Ok(())
}
