use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oot_operator::cli::{format_dry_run, Args};
use oot_operator::cluster::{
    create_control_plane_router, spawn_orchestrator, ClusterController, ControlPlaneState,
};
use oot_operator::config::{apply_manifests, load_config_file, load_manifest_file, OperatorConfig};
use oot_operator::reconcile::{EventFilter, TargetReconciler};
use oot_operator::registry::HttpRegistryProbe;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }

    let mut config = match args.config {
        Some(ref path) => load_config_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => OperatorConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    let mut manifests = Vec::new();
    for path in &args.manifests {
        let loaded = load_manifest_file(path)
            .with_context(|| format!("Failed to load manifest file {}", path.display()))?;
        manifests.extend(loaded);
    }

    // Dry-run mode: print the effective setup and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &manifests));
        return Ok(());
    }

    let controller = ClusterController::new();
    let seeded = apply_manifests(&controller, manifests).context("Failed to seed manifests")?;
    info!("Seeded {} object(s) from manifests", seeded);

    let registry = HttpRegistryProbe::new(Arc::new(controller.clone()), config.registry_timeout())
        .context("Failed to create registry client")?;
    let reconciler = TargetReconciler::for_cluster(
        &controller,
        Arc::new(registry),
        &config.pipeline_settings(),
        config.kernel_label.clone(),
    );

    let shutdown = spawn_orchestrator(
        controller.clone(),
        reconciler,
        EventFilter::new(config.kernel_label.clone()),
        config.orchestrator_config(),
    );

    let addr = format!(
        "{}:{}",
        config.control_plane.bind_addr, config.control_plane.port
    );
    let app = create_control_plane_router(ControlPlaneState::with_controller(controller));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Control plane listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health                                   - Health check");
    info!("  GET  /v1/status                                - Cluster statistics");
    info!("  GET  /v1/targets, POST /v1/targets             - List / apply targets");
    info!("  POST /v1/nodes                                 - Register a node");
    info!("  PUT  /v1/namespaces/{{ns}}/jobs/{{name}}/status  - Report job progress");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for shutdown signal: {}", e);
                    }
                }
                _ = token.cancelled() => {}
            }
        })
        .await
        .context("Server error")?;

    info!("Shutting down");
    shutdown.cancel();
    Ok(())
}
