//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::ServiceConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::commands::load_config;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut service = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    apply_overrides(&mut service, args)?;

    info!(
        frames_per_second = service.concentrator.frames_per_second,
        lag_time = service.concentrator.lag_time,
        lead_time = service.concentrator.lead_time,
        sources = service.sources.len(),
        sinks = service.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&service);
        return Ok(());
    }

    let late_delay = args
        .late_delay
        .unwrap_or(service.concentrator.lag_time * 2.0)
        .max(0.0);

    let pipeline = Pipeline::new(PipelineConfig {
        service,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        buffer_size: args.buffer_size.max(1),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        late_delay: Duration::from_secs_f64(late_delay),
    });

    info!("Starting pipeline...");
    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        frames_published = stats.frames_published,
        frames_dropped = stats.frames_dropped,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?;
        println!("{}", json);
    } else {
        stats.print_summary();
        println!("{}", stats.status);
    }

    info!("Concentrator finished");
    Ok(())
}

/// Apply `--settings` and `--frames-per-second` on top of the file.
fn apply_overrides(service: &mut ServiceConfig, args: &RunArgs) -> Result<()> {
    if let Some(ref settings) = args.settings {
        info!(settings = %settings, "Overriding concentrator settings from CLI");
        service.concentrator = config_loader::ConfigLoader::parse_settings(settings)
            .context("Invalid --settings")?;
    }
    if let Some(fps) = args.frames_per_second {
        info!(fps, "Overriding frame rate from CLI");
        service.concentrator.frames_per_second = fps;
    }
    config_loader::ConfigLoader::validate(service).context("Invalid configuration after overrides")?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(service: &ServiceConfig) {
    let c = &service.concentrator;
    println!("\n=== Configuration Summary ===\n");
    println!("Concentrator:");
    println!("  Frames per second: {}", c.frames_per_second);
    println!("  Lag time: {}s, lead time: {}s", c.lag_time, c.lead_time);
    println!("  Downsampling: {}", c.downsampling_method.as_str());
    println!("  Expected measurements: {}", c.expected_measurements);

    println!("\nSources ({}):", service.sources.len());
    for source in &service.sources {
        println!(
            "  - {} - {} signals @ {} Hz",
            source.name, source.signal_count, source.rate_hz
        );
    }

    if !service.sinks.is_empty() {
        println!("\nSinks ({}):", service.sinks.len());
        for sink in &service.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["run"];
        argv.extend_from_slice(extra);
        RunArgs::parse_from(argv)
    }

    #[test]
    fn test_settings_override_replaces_section() {
        let file = write_config(SAMPLE_TOML);
        let mut service = load_config(file.path()).unwrap();
        let args = args(&["--settings", "framesPerSecond=60; lagTime=2; leadTime=1", "--frames-per-second", "120"]);

        apply_overrides(&mut service, &args).unwrap();
        assert_eq!(service.concentrator.frames_per_second, 120);
        assert_eq!(service.concentrator.lag_time, 2.0);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let file = write_config(SAMPLE_TOML);
        let mut service = load_config(file.path()).unwrap();
        let args = args(&["--frames-per-second", "0"]);
        assert!(apply_overrides(&mut service, &args).is_err());
    }

    #[tokio::test]
    async fn test_dry_run() {
        let file = write_config(SAMPLE_TOML);
        let path = file.path().display().to_string();
        let args = args(&["--config", &path, "--dry-run"]);
        assert!(run_pipeline(&args).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_config() {
        let args = args(&["--config", "/nonexistent/concentrator.toml"]);
        let err = run_pipeline(&args).await.unwrap_err();
        assert!(format!("{err:#}").contains("not found"));
    }
}
