// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector;
use kube::{Api, Client};
use negsync::{
    backends::Backends,
    cloud::compute::{ComputeClient, DEFAULT_COMPUTE_ENDPOINT},
    config::{ControllerConfig, DefaultBackend},
    constants::{
        CONTROLLER_NAME, DEFAULT_GC_PERIOD_SECS, DEFAULT_METRICS_BIND_ADDRESS,
        DEFAULT_RESYNC_PERIOD_SECS, STALENESS_BOUND_SECS,
    },
    context::{Context, Stores},
    controller::NegController,
    events::KubeEventPublisher,
    gc::GarbageCollector,
    health::TimeTracker,
    metrics::PrometheusMetrics,
    namer::Namer,
    server::{router, ServerState},
    status::{KubeServiceAnnotator, StatusWriter},
    syncer::{endpoints::StoreEndpointSource, manager::SyncerManager, SyncerContext},
    watch::{pump, watch_stream},
    zones::NodeZoneGetter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Timeout of a single compute API request
const COMPUTE_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "negsync", version, about, long_about = None)]
struct Args {
    /// Cluster UID embedded in the names of created resources
    #[arg(long, env = "CLUSTER_UID")]
    cluster_uid: String,

    /// Project owning the NEGs and backend services
    #[arg(long, env = "GCE_PROJECT")]
    project: String,

    /// Region of the cluster
    #[arg(long, env = "GCE_REGION")]
    region: String,

    #[arg(long, default_value = "default")]
    network: String,

    #[arg(long, default_value = "default")]
    subnetwork: String,

    /// Default ingress backend as NAMESPACE/NAME:PORT[:TARGET_PORT]
    #[arg(long)]
    default_backend: Option<DefaultBackend>,

    /// Create NEGs for every port of every selector-backed service
    #[arg(long)]
    enable_mesh: bool,

    #[arg(long, value_delimiter = ',', default_value = "kube-system,istio-system")]
    mesh_skip_namespaces: Vec<String>,

    /// Handle L4 internal and multi-network external load balancers
    #[arg(long)]
    run_l4: bool,

    #[arg(long)]
    enable_ingress_regional_external: bool,

    #[arg(long)]
    enable_connection_tracking: bool,

    /// Period of the syncers' full resync
    #[arg(long, default_value_t = DEFAULT_RESYNC_PERIOD_SECS)]
    resync_period_secs: u64,

    #[arg(long, default_value_t = DEFAULT_GC_PERIOD_SECS)]
    gc_period_secs: u64,

    /// Report unhealthy when no pass completed for this long
    #[arg(long, default_value_t = STALENESS_BOUND_SECS)]
    staleness_bound_secs: i64,

    #[arg(long, default_value = DEFAULT_COMPUTE_ENDPOINT)]
    compute_endpoint: String,

    /// OAuth bearer token for the compute API
    #[arg(long, env = "COMPUTE_ACCESS_TOKEN", hide_env_values = true)]
    compute_token: Option<String>,

    /// Address serving /metrics and /healthz
    #[arg(long, default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    metrics_bind_address: SocketAddr,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            cluster_uid: self.cluster_uid.clone(),
            project: self.project.clone(),
            region: self.region.clone(),
            network: self.network.clone(),
            subnetwork: self.subnetwork.clone(),
            default_backend: self.default_backend.clone(),
            enable_mesh: self.enable_mesh,
            mesh_skip_namespaces: self.mesh_skip_namespaces.clone(),
            run_l4: self.run_l4,
            enable_ingress_regional_external: self.enable_ingress_regional_external,
            enable_connection_tracking: self.enable_connection_tracking,
            resync_period: Duration::from_secs(self.resync_period_secs),
            gc_period: Duration::from_secs(self.gc_period_secs),
            staleness_bound: chrono::Duration::seconds(self.staleness_bound_secs),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("negsync-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_tracing() {
    // Respects RUST_LOG, defaulting to INFO.
    // RUST_LOG_FORMAT=json switches to JSON output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

/// Resolves on SIGINT, or on SIGTERM where available.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing();
    info!("Starting NEG controller");

    let config = Arc::new(args.controller_config());
    info!(
        cluster_uid = %config.cluster_uid,
        project = %config.project,
        region = %config.region,
        run_l4 = config.run_l4,
        enable_mesh = config.enable_mesh,
        "Loaded configuration"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(COMPUTE_REQUEST_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client")?;
    let cloud = Arc::new(
        ComputeClient::new(
            http,
            &args.compute_endpoint,
            &config.project,
            &config.region,
            args.compute_token.clone(),
        )
        .context("invalid compute endpoint")?,
    );
    let metrics = Arc::new(PrometheusMetrics::new()?);
    let namer = Namer::new(&config.cluster_uid);

    let (services, services_writer) = reflector::store::<Service>();
    let (ingresses, ingresses_writer) = reflector::store::<Ingress>();
    let (nodes, nodes_writer) = reflector::store::<Node>();
    let (endpoint_slices, endpoint_slices_writer) = reflector::store::<EndpointSlice>();
    let stores = Stores {
        services,
        ingresses,
        nodes,
        endpoint_slices,
    };

    let zones = Arc::new(NodeZoneGetter::new(stores.nodes.clone()));
    let backends = Arc::new(Backends::new(
        cloud.clone(),
        namer.clone(),
        config.enable_connection_tracking,
    ));
    let syncer_ctx = SyncerContext {
        cloud: cloud.clone(),
        zones: zones.clone(),
        endpoints: Arc::new(StoreEndpointSource::new(
            stores.endpoint_slices.clone(),
            stores.nodes.clone(),
        )),
        metrics: metrics.clone(),
        config: config.clone(),
    };
    let collector = GarbageCollector::new(
        cloud.clone(),
        backends.clone(),
        zones.clone(),
        namer.clone(),
        metrics.clone(),
    );
    let manager = Arc::new(SyncerManager::new(syncer_ctx, backends, collector));

    let ctx = Context {
        stores: stores.clone(),
        config: config.clone(),
        namer,
        metrics: metrics.clone(),
        tracker: Arc::new(TimeTracker::new()),
    };
    let controller = Arc::new(NegController::new(
        ctx,
        manager,
        StatusWriter::new(Arc::new(KubeServiceAnnotator::new(client.clone())), zones),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
    ));

    debug!("Starting watches");
    let enqueuer = controller.enqueuer();
    {
        let enqueuer = enqueuer.clone();
        let stream = watch_stream(Api::<Service>::all(client.clone()));
        tokio::spawn(pump("Service", stream, services_writer, move |e| {
            enqueuer.on_service(&e);
        }));
    }
    {
        let enqueuer = enqueuer.clone();
        let stream = watch_stream(Api::<Ingress>::all(client.clone()));
        tokio::spawn(pump("Ingress", stream, ingresses_writer, move |e| {
            enqueuer.on_ingress(&e);
        }));
    }
    {
        let enqueuer = enqueuer.clone();
        let stream = watch_stream(Api::<Node>::all(client.clone()));
        tokio::spawn(pump("Node", stream, nodes_writer, move |e| {
            enqueuer.on_node(&e);
        }));
    }
    {
        let stream = watch_stream(Api::<EndpointSlice>::all(client.clone()));
        tokio::spawn(pump("EndpointSlice", stream, endpoint_slices_writer, move |e| {
            enqueuer.on_endpoint_slice(&e);
        }));
    }

    stores
        .wait_until_ready()
        .await
        .context("watch stopped before the initial listing")?;
    info!("Caches synced");

    let listener = tokio::net::TcpListener::bind(args.metrics_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", args.metrics_bind_address))?;
    info!(address = %args.metrics_bind_address, "Serving /metrics and /healthz");
    let state = ServerState {
        metrics,
        health: controller.clone(),
    };
    let server = tokio::spawn(async move { axum::serve(listener, router(state)).await });

    let mut runner = tokio::spawn(controller.clone().run());

    tokio::select! {
        result = shutdown_signal() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
        }
        result = &mut runner => {
            error!("CRITICAL: NEG controller exited unexpectedly: {:?}", result);
            server.abort();
            anyhow::bail!("NEG controller exited unexpectedly")
        }
    }

    controller.shut_down();
    if let Err(e) = runner.await {
        error!(error = %e, "NEG controller task failed");
    }
    server.abort();
    info!("NEG controller stopped");
    Ok(())
}
