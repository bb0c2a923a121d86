//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{ConcentratorConfig, ServiceConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::load_config;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    frames_per_second: u32,
    lag_time: f64,
    lead_time: f64,
    downsampling_method: String,
    source_count: usize,
    signal_count: u32,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    let result = match &args.settings {
        Some(settings) => {
            info!("Validating settings string");
            validate_settings(settings)
        }
        None => {
            info!(config = %args.config.display(), "Validating configuration");
            validate_file(args)
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_file(args: &ValidateArgs) -> ValidationResult {
    let source = args.config.display().to_string();

    match load_config(&args.config) {
        Ok(service) => ValidationResult {
            valid: true,
            source,
            error: None,
            warnings: collect_warnings(&service),
            summary: Some(summarize(&service.concentrator, &service)),
        },
        Err(e) => invalid(source, e.to_string()),
    }
}

fn validate_settings(settings: &str) -> ValidationResult {
    match config_loader::ConfigLoader::parse_settings(settings) {
        Ok(concentrator) => ValidationResult {
            valid: true,
            source: "settings".to_string(),
            error: None,
            warnings: concentrator_warnings(&concentrator),
            summary: None,
        },
        Err(e) => invalid("settings".to_string(), e.to_string()),
    }
}

fn invalid(source: String, error: String) -> ValidationResult {
    ValidationResult {
        valid: false,
        source,
        error: Some(error),
        warnings: Vec::new(),
        summary: None,
    }
}

fn summarize(c: &ConcentratorConfig, service: &ServiceConfig) -> ConfigSummary {
    ConfigSummary {
        frames_per_second: c.frames_per_second,
        lag_time: c.lag_time,
        lead_time: c.lead_time,
        downsampling_method: c.downsampling_method.as_str().to_string(),
        source_count: service.sources.len(),
        signal_count: service.total_signals(),
        sink_count: service.sinks.len(),
    }
}

/// Non-fatal issues
fn collect_warnings(service: &ServiceConfig) -> Vec<String> {
    let mut warnings = concentrator_warnings(&service.concentrator);

    if service.sources.is_empty() {
        warnings.push("No sources configured - nothing will be concentrated".to_string());
    }
    if service.sinks.is_empty() {
        warnings.push("No sinks configured - published frames will only be counted".to_string());
    }

    let fps = f64::from(service.concentrator.frames_per_second);
    for source in &service.sources {
        if source.rate_hz < fps {
            warnings.push(format!(
                "Source '{}' reports at {} Hz, below the frame rate of {} - frames will be incomplete",
                source.name, source.rate_hz, fps
            ));
        }
        if source.jitter_ms / 1000.0 >= service.concentrator.lag_time {
            warnings.push(format!(
                "Source '{}' jitter ({} ms) reaches the lag time - samples will arrive late",
                source.name, source.jitter_ms
            ));
        }
    }

    let expected = service.concentrator.expected_measurements;
    if expected > 0 && expected != service.total_signals() {
        warnings.push(format!(
            "expected_measurements ({}) differs from the configured signal count ({})",
            expected,
            service.total_signals()
        ));
    }

    warnings
}

fn concentrator_warnings(c: &ConcentratorConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if c.lead_time > c.lag_time {
        warnings.push(format!(
            "lead_time ({}s) exceeds lag_time ({}s)",
            c.lead_time, c.lag_time
        ));
    }
    if c.ignore_bad_timestamps {
        warnings.push("ignore_bad_timestamps is on - tolerance checks are skipped".to_string());
    }
    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.source);

        if let Some(ref summary) = result.summary {
            println!("\n  Frames per second: {}", summary.frames_per_second);
            println!("  Lag / lead: {}s / {}s", summary.lag_time, summary.lead_time);
            println!("  Downsampling: {}", summary.downsampling_method);
            println!(
                "  Sources: {} ({} signals)",
                summary.source_count, summary.signal_count
            );
            println!("  Sinks: {}", summary.sink_count);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.source);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::*;
    use std::path::PathBuf;

    fn args(config: PathBuf, settings: Option<&str>) -> ValidateArgs {
        ValidateArgs {
            config,
            settings: settings.map(str::to_string),
            json: true,
        }
    }

    #[test]
    fn test_valid_file_with_warnings() {
        let file = write_config(SAMPLE_TOML);
        let result = validate_file(&args(file.path().to_path_buf(), None));
        assert!(result.valid);
        assert_eq!(result.summary.as_ref().unwrap().signal_count, 6);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_slow_source_warns() {
        let file = write_config(&SAMPLE_TOML.replace("rate_hz = 30.0", "rate_hz = 10.0"));
        let result = validate_file(&args(file.path().to_path_buf(), None));
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("PMU1")));
    }

    #[test]
    fn test_invalid_file() {
        let file = write_config(&SAMPLE_TOML.replace("lag_time = 1.0", "lag_time = 0.0"));
        let result = validate_file(&args(file.path().to_path_buf(), None));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("lag_time"));
        assert!(run_validate(&args(file.path().to_path_buf(), None)).is_err());
    }

    #[test]
    fn test_settings_string() {
        let ok = validate_settings("framesPerSecond=30; lagTime=0.5; leadTime=1");
        assert!(ok.valid);
        assert_eq!(ok.warnings.len(), 1);

        let bad = validate_settings("framesPerSecond=30");
        assert!(!bad.valid);
    }
}
