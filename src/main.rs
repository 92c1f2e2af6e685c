// Kiln - Distributed fine-tuning orchestrator
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use kiln::config::load_config;
use kiln::dist::{
    bind_device, master_endpoint_from_env, Collective, NoopCollective, ProcessIdentity,
    TcpCollective,
};
use kiln::metrics::MetricsLogger;
use kiln::providers;
use kiln::training::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Distributed fine-tuning orchestrator for local language models", version)]
struct Args {
    /// Path to the run configuration file
    #[arg(long = "config", default_value = "configs/run.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    // Resolve the process topology exactly once; everything downstream
    // receives the value by reference and never re-reads the environment.
    let identity = ProcessIdentity::from_env()?;
    tracing::info!(
        rank = identity.rank,
        world_size = identity.world_size,
        distributed = identity.distributed,
        "Process topology resolved"
    );

    let device = bind_device(&identity, config.seed)?;

    let collective: Box<dyn Collective> = if identity.distributed && identity.world_size > 1 {
        Box::new(TcpCollective::connect(&identity, &master_endpoint_from_env())?)
    } else {
        Box::new(NoopCollective)
    };

    // Rank 0 prepares the output root and metrics logging; the barrier keeps
    // the other ranks from entering the loop before that setup exists.
    let mut metrics = if identity.is_main() {
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_dir.display()
            )
        })?;
        if config.enable_metrics_logging {
            Some(MetricsLogger::new(&config.output_dir)?)
        } else {
            None
        }
    } else {
        None
    };
    collective.barrier()?;

    let mut parts = providers::build(&config, &identity, &device)?;

    let mut orchestrator = Orchestrator::new(&config, &identity);
    let summary = orchestrator.run(
        parts.model.as_mut(),
        parts.dataset.as_mut(),
        parts.engine.as_deref_mut().map(|e| e as &mut dyn kiln::sampling::GenerationEngine),
        metrics.as_mut(),
    )?;

    collective.shutdown()?;
    tracing::info!(
        start_epoch = summary.start_epoch,
        steps = summary.state.global_step(),
        "Run complete"
    );
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
