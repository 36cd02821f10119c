//! spp-operator - Kubernetes operator for DPDK Soft Patch Panel deployments

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spp_operator::config::{OperatorConfig, FIELD_MANAGER};
use spp_operator::controller::{error_policy, reconcile, Context};
use spp_operator::crd::Spp;

/// spp-operator - declarative DPDK Soft Patch Panel deployments
#[derive(Parser, Debug)]
#[command(name = "spp-operator", version, about, long_about = None)]
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
    /// Watches Spp resources and the pods and services they own, and
    /// reconciles each Spp toward its spec.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Spp::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let config = match cli.command {
        Some(Commands::Controller(args)) => args.config,
        None => OperatorConfig::default(),
    };
    run_controller(config).await
}

/// Run the Spp controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!("spp-operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup
    ensure_crd_installed(&client).await?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(config)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build controller context: {}", e))?,
    );

    let spps: Api<Spp> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client);

    tracing::info!("Starting Spp controller...");

    Controller::new(spps, WatcherConfig::default())
        .owns(pods, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Spp reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Spp reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("spp-operator stopped");
    Ok(())
}

/// Server-side apply the Spp CRD
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Spp CRD...");
    crds.patch("spps.spp.dev", &params, &Patch::Apply(&Spp::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Spp CRD: {}", e))?;

    Ok(())
}
