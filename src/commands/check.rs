//! Validate a configuration file without registering anything.

use anyhow::Result;
use std::path::Path;

use loglife::LogLifeConfig;
use loglife::target::TargetSpec;

/// Load `config_path`, validate it and print what `run` would register.
pub fn execute(config_path: &Path) -> Result<()> {
    let config = LogLifeConfig::load_from(config_path)?;
    let validation = config.validate()?;

    for warning in &validation.warnings {
        eprintln!("warning: {warning}");
    }

    let (defaults, specs) = config.registration()?;
    println!("Config:      {}", config_path.display());
    println!("Interval:    {:?}", config.interval()?);
    println!("Stall after: {:?}", config.stall_timeout()?);
    println!("Targets:     {}", specs.len());
    for spec in &specs {
        let action = match spec {
            TargetSpec::Record { options, .. } => options.merged_over(&defaults).action(),
            TargetSpec::Path(_) => defaults.action(),
        };
        println!("  - {} ({action})", spec.id());
    }
    if !validation.has_warnings() {
        println!("\nConfiguration OK");
    }
    Ok(())
}
