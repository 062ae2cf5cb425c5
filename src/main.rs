use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pdb_controller::cluster::KubeCluster;
use pdb_controller::controller::{Controller, ControllerConfig, DEFAULT_PDB_NAME_SUFFIX};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Keeps a PodDisruptionBudget next to every Deployment and StatefulSet
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Time between reconciliation passes
    #[arg(long, env = "PDB_CONTROLLER_INTERVAL", value_parser = humantime::parse_duration, default_value = "1m")]
    interval: Duration,

    /// Kubernetes API server URL; in-cluster configuration is used when unset
    #[arg(long, env = "PDB_CONTROLLER_APISERVER")]
    apiserver: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "PDB_CONTROLLER_DEBUG")]
    debug: bool,

    /// Suffix appended to workload names to form managed PDB names
    #[arg(long, env = "PDB_CONTROLLER_PDB_NAME_SUFFIX", default_value = DEFAULT_PDB_NAME_SUFFIX)]
    pdb_name_suffix: String,

    /// Remove a workload's PDB once it has been non-ready this long (0s disables)
    #[arg(long, env = "PDB_CONTROLLER_NON_READY_TTL", value_parser = humantime::parse_duration, default_value = "0s")]
    non_ready_ttl: Duration,

    /// Only reconcile namespaces matching this label selector
    #[arg(long, env = "PDB_CONTROLLER_NAMESPACE_SELECTOR", default_value = "")]
    namespace_selector: String,

    /// Log output format
    #[arg(long, env = "PDB_CONTROLLER_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Address for the /health and /metrics endpoints
    #[cfg(feature = "rest-api")]
    #[arg(long, env = "PDB_CONTROLLER_LISTEN_ADDRESS", default_value = "0.0.0.0:8080")]
    listen_address: std::net::SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!("Starting pdb-controller v{}", env!("CARGO_PKG_VERSION"));

    let config = ControllerConfig {
        interval: args.interval,
        pdb_name_suffix: args.pdb_name_suffix.clone(),
        non_ready_ttl: args.non_ready_ttl,
        namespace_selector: args.namespace_selector.clone(),
    };
    config.validate().context("invalid configuration")?;

    let client = build_client(args.apiserver.as_deref())?;
    let cluster = Arc::new(KubeCluster::new(client, config.call_timeout()));
    let mut controller =
        Controller::new(cluster, config).context("failed to initialise the controller")?;
    controller
        .preflight()
        .await
        .context("cannot reach the Kubernetes API server")?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    #[cfg(feature = "rest-api")]
    let server = {
        let state = controller.state();
        let addr = args.listen_address;
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = pdb_controller::rest_api::run_server(state, addr, token).await {
                error!("REST API server error: {:?}", e);
            }
        })
    };

    controller.run(token.clone()).await;
    token.cancel();

    #[cfg(feature = "rest-api")]
    if let Err(e) = server.await {
        error!("REST API server task failed: {}", e);
    }

    info!("pdb-controller stopped");
    Ok(())
}

fn init_tracing(args: &Args) {
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match args.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

/// Build a client for `apiserver`, or for the cluster we are running in
fn build_client(apiserver: Option<&str>) -> anyhow::Result<kube::Client> {
    let config = client_config(apiserver)?;
    info!("Using Kubernetes API server {}", config.cluster_url);
    kube::Client::try_from(config).context("failed to create Kubernetes client")
}

/// An explicit API server is contacted as-is, without credentials from a
/// local kubeconfig.
fn client_config(apiserver: Option<&str>) -> anyhow::Result<kube::Config> {
    match apiserver {
        Some(url) => {
            let uri: http::Uri = url
                .parse()
                .with_context(|| format!("invalid API server URL {url:?}"))?;
            Ok(kube::Config::new(uri))
        }
        None => kube::Config::incluster().context("failed to load in-cluster configuration"),
    }
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, finishing the current pass"),
        _ = terminate => info!("Received SIGTERM, finishing the current pass"),
    }
    token.cancel();
}
