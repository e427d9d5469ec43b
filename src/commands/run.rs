//! Rotate the configured targets until interrupted.
//!
//! The engine's own log lines go through the `process.stdout` tee, so a
//! config that registers `process.stdout` rotates loglife's output too.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use loglife::units::parse_duration;
use loglife::{LogLife, LogLifeConfig, Readiness, Registry, StdStream};

/// Load `config_path`, register its targets and tick until Ctrl-C.
///
/// `interval` overrides the configured tick interval. Every descriptor and
/// output handle is closed before returning, on success and on error alike.
pub async fn execute(config_path: &Path, interval: Option<&str>, json: bool) -> Result<()> {
    let registry = Arc::new(Registry::new());
    init_logging(&registry, json);

    let config = LogLifeConfig::load_from(config_path)?;
    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let interval = match interval {
        Some(s) => parse_duration(s).with_context(|| format!("Invalid --interval: {s}"))?,
        None => config.interval()?,
    };
    let (defaults, specs) = config.registration()?;

    let engine = LogLife::with_registry(registry).with_stall_timeout(config.stall_timeout()?);
    let result = serve(&engine, specs, &defaults, interval).await;
    engine.stop(false).await;
    result
}

async fn serve(
    engine: &LogLife,
    specs: Vec<loglife::TargetSpec>,
    defaults: &loglife::TargetOptions,
    interval: std::time::Duration,
) -> Result<()> {
    let targets = engine
        .register(specs, defaults)
        .await
        .context("Failed to register targets")?;

    let ready = targets
        .iter()
        .filter(|t| t.readiness() == Readiness::Ready)
        .count();
    for target in &targets {
        if let Readiness::Failed(reason) = target.readiness() {
            warn!(target_id = %target.id(), reason = %reason, "Target disabled");
        }
    }
    info!(
        registered = targets.len(),
        ready,
        interval = ?interval,
        "loglife running, press Ctrl-C to stop"
    );

    engine.start(Some(interval));
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}

fn init_logging(registry: &Arc<Registry>, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = Arc::clone(registry);
    let writer = move || stdout.stream_writer(StdStream::Stdout);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .init();
    }
}
