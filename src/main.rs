//! Status updater - Main Entry Point
//!
//! Runs the update pipeline once and exits. The config file is taken from
//! the first argument, else from `ONIONOO_CONFIG`, else defaults apply.

use anyhow::{bail, Context};
use onionoo_rs::{
    config::UpdaterConfig,
    context::UpdaterContext,
    pipeline::{PipelineOrchestrator, RunOutcome},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,onionoo_rs=debug";

fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => UpdaterConfig::load(&path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => UpdaterConfig::load_from_env().context("loading config")?,
    };

    // Initialize logging; the guard flushes the file writer on exit
    let default_filter = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let (file_layer, _guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "onionoo-rs.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting status updater, data in {:?}", config.paths.data_dir);

    let mut ctx = UpdaterContext::from_config(config).context("setting up services")?;
    match PipelineOrchestrator::run(&mut ctx) {
        RunOutcome::Completed(report) => {
            if !report.issues.is_empty() {
                tracing::warn!("Run completed with {} issues", report.issues.len());
            }
            Ok(())
        }
        RunOutcome::Skipped => {
            tracing::info!("Run skipped");
            Ok(())
        }
        RunOutcome::Failed(reason) => bail!("update run failed: {}", reason),
    }
}
