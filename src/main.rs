use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use scan_exporter::metrics::{MetricsSink, PromSink};
use scan_exporter::store::RedisStore;
use scan_exporter::{config, server};

/// scan-exporter: periodic multi-target port scanner exposing results as
/// Prometheus metrics.
#[derive(Debug, Parser)]
#[command(
    name = "scan-exporter",
    version,
    about = "Periodic multi-target port scanner exposing results as Prometheus metrics.",
    long_about = None
)]
struct Cli {
    /// Path to config file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let targets = config::load(&cli.config)
        .with_context(|| format!("error in config {}", cli.config.display()))?;
    info!("{} targets found in {}", targets.len(), cli.config.display());

    let store = Arc::new(RedisStore::from_env()?);
    let sink = Arc::new(PromSink::new(store)?);
    sink.set_target_count(targets.len());
    Arc::clone(&sink).start_uptime();

    let registry = sink.registry();
    tokio::spawn(async move {
        if let Err(e) = server::serve(server::METRICS_ADDR, registry).await {
            error!("metrics server error: {e:#}");
        }
    });

    for target in targets {
        let sink: Arc<dyn MetricsSink> = sink.clone();
        info!("starting {} scan", target.name());
        tokio::spawn(Arc::new(target).run(sink));
    }

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
