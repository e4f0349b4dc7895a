use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cronhpa_operator::{
    config::Config,
    controllers::CronHpaController,
    cron::CronEngine,
    kubernetes::{KubeScaleClient, KubeStore},
    manager::{CronManager, ManagerSettings},
    metrics::Metrics,
    scaling::ExecutionSettings,
    server::Server,
};

#[derive(Parser, Debug)]
#[command(name = "cronhpa-operator", about = "Scales workloads on cron schedules")]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Debug server listen address
    #[arg(long)]
    server_addr: Option<String>,

    /// IANA time zone the schedules are evaluated in
    #[arg(long)]
    timezone: Option<String>,

    /// Seconds between two garbage-collection passes
    #[arg(long)]
    gc_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},kube=warn,tower_http=warn", cli.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load()?;
    if let Some(addr) = cli.server_addr {
        config.server.addr = addr;
    }
    if let Some(timezone) = cli.timezone {
        config.cron.timezone = timezone;
    }
    if let Some(secs) = cli.gc_interval_secs {
        config.cron.gc_interval_secs = secs;
    }
    config.validate()?;
    info!("Loaded configuration: {:?}", config);

    let timezone = config.timezone()?;
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let metrics = Arc::new(Metrics::new()?);

    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(CronEngine::new(timezone, config.staleness(), results_tx));
    let settings = ManagerSettings {
        execution: ExecutionSettings {
            retry_interval: config.retry_interval(),
            retry_timeout: config.retry_timeout(),
            timezone,
        },
        gc_interval: config.gc_interval(),
        status_patch_retries: config.scaling.status_patch_retries,
    };
    let manager = Arc::new(CronManager::new(
        engine.clone(),
        Arc::new(KubeStore::new(client.clone(), config.kube.reporter.clone())),
        Arc::new(KubeScaleClient::new(client.clone())),
        metrics.clone(),
        settings,
    ));

    let shutdown = CancellationToken::new();
    let manager_task = tokio::spawn(manager.clone().run(results_rx, shutdown.clone()));

    let server = Server::new(engine, metrics);
    let addr = config.server.addr.clone();
    let server_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { server.start(&addr, shutdown).await }
    });

    // Returns once the controller has seen SIGINT or SIGTERM.
    let controller = Arc::new(CronHpaController::new(client, manager));
    if let Err(e) = controller.run().await {
        error!("CronHPA controller failed: {}", e);
    }

    info!("Shutting down");
    shutdown.cancel();
    if let Err(e) = manager_task.await {
        error!("Cron manager task failed: {}", e);
    }
    match server_task.await {
        Ok(Err(e)) => error!("Debug server failed: {}", e),
        Err(e) => error!("Debug server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
