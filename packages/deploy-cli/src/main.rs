//! Operator CLI for contact-discovery deployments.

mod config;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use media_deploy::{DeploymentOrchestrator, DeploymentPreset, DeploymentProgress, ProgressObserver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "media-deploy")]
#[command(about = "Bulk contact discovery across the media outlet catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one deployment to completion, logging every progress snapshot
    Run(RunArgs),

    /// Serve the HTTP + SSE deployment API
    Serve {
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print contact statistics for a tenant
    Stats {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// quick-start, aggressive or premium
    #[arg(long, default_value = "quick-start")]
    preset: DeploymentPreset,

    #[arg(long)]
    tenant: String,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    delay_ms: Option<u64>,

    #[arg(long)]
    no_verify: bool,

    #[arg(long)]
    no_categorize: bool,

    #[arg(long)]
    monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,media_deploy=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let orchestrator = config.orchestrator()?;

    let outcome = match cli.command {
        Commands::Run(args) => run_deployment(&orchestrator, args).await,
        Commands::Serve { port } => serve(orchestrator.clone(), port.unwrap_or(config.port)).await,
        Commands::Stats { tenant } => print_statistics(&orchestrator, &tenant).await,
    };

    orchestrator.shutdown();
    outcome
}

async fn run_deployment(orchestrator: &DeploymentOrchestrator, args: RunArgs) -> Result<()> {
    let mut deployment = args.preset.config(args.tenant);
    if let Some(batch_size) = args.batch_size {
        deployment.batch_size = batch_size;
    }
    if let Some(delay_ms) = args.delay_ms {
        deployment.delay_between_batches_ms = delay_ms;
    }
    if args.no_verify {
        deployment.auto_verify = false;
    }
    if args.no_categorize {
        deployment.auto_categorize = false;
    }
    if args.monitor {
        deployment.enable_monitoring = true;
    }

    let observer: Arc<dyn ProgressObserver> = Arc::new(|progress: &DeploymentProgress| {
        tracing::info!(
            deployment_id = %progress.deployment_id,
            phase = %progress.current_phase,
            phase_progress = progress.phase_progress,
            completed = progress.completed_targets,
            failed = progress.failed_targets,
            total = progress.total_targets,
            discovered = progress.contacts_discovered,
            verified = progress.contacts_verified,
            categorized = progress.contacts_categorized,
            "progress"
        );
    });

    let handle = orchestrator
        .deploy(deployment, Some(observer))
        .context("Deployment rejected")?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight batch");
            cancel.cancel();
        }
    });

    let progress = handle.wait().await.context("Deployment failed")?;
    for warning in &progress.warnings {
        tracing::warn!(%warning, "deployment warning");
    }
    for error in &progress.errors {
        tracing::warn!(%error, "item failure");
    }

    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}

async fn serve(orchestrator: DeploymentOrchestrator, port: u16) -> Result<()> {
    let app = server::router(server::AppState::new(orchestrator));

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Deployment API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")
}

async fn print_statistics(orchestrator: &DeploymentOrchestrator, tenant: &str) -> Result<()> {
    let stats = orchestrator
        .get_deployment_statistics(tenant)
        .await
        .context("Failed to fetch statistics")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
