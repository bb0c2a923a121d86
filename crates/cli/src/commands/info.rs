//! `info` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::{ConcentratorConfig, ServiceConfig, TICKS_PER_MILLISECOND};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::commands::load_config;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    concentrator: ConcentratorInfo,
    sources: Vec<SourceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

/// Configured values plus what the engine derives from them
#[derive(Serialize)]
struct ConcentratorInfo {
    #[serde(flatten)]
    config: ConcentratorConfig,
    ticks_per_frame: i64,
    publication_timeout_ms: Option<i64>,
    cadence: String,
}

#[derive(Serialize)]
struct SourceInfo {
    name: String,
    signal_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jitter_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    late_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bad_time_probability: Option<f64>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let service = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&service, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&service, args);
    }

    Ok(())
}

fn ticks_per_frame(c: &ConcentratorConfig) -> i64 {
    contracts::TICKS_PER_SECOND / i64::from(c.frames_per_second.max(1))
}

/// Scheduler wait in milliseconds; None = infinite.
fn publication_timeout_ms(c: &ConcentratorConfig) -> Option<i64> {
    match c.maximum_publication_timeout {
        Some(-1) => None,
        Some(ms) => Some(ms.max(1)),
        None => {
            let derived = (ticks_per_frame(c) as f64 * 1.2 / TICKS_PER_MILLISECOND as f64).round();
            Some((derived as i64).max(1))
        }
    }
}

fn cadence(c: &ConcentratorConfig) -> String {
    match c.effective_processing_interval() {
        ms if ms > 0 => format!("every {ms} ms"),
        -1 if c.effective_use_precision_timer() => "frame rate timer".to_string(),
        _ => "as data arrives".to_string(),
    }
}

fn build_config_info(service: &ServiceConfig, args: &InfoArgs) -> ConfigInfo {
    let c = &service.concentrator;

    let sources = service
        .sources
        .iter()
        .map(|s| {
            let detail = |v: f64| args.sources.then_some(v);
            SourceInfo {
                name: s.name.clone(),
                signal_count: s.signal_count,
                rate_hz: detail(s.rate_hz),
                jitter_ms: detail(s.jitter_ms),
                late_probability: detail(s.late_probability),
                bad_time_probability: detail(s.bad_time_probability),
            }
        })
        .collect();

    let sinks = if args.sinks {
        service
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
                params: s.params.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", service.version),
        concentrator: ConcentratorInfo {
            config: c.clone(),
            ticks_per_frame: ticks_per_frame(c),
            publication_timeout_ms: publication_timeout_ms(c),
            cadence: cadence(c),
        },
        sources,
        sinks,
    }
}

fn print_config_info(service: &ServiceConfig, args: &InfoArgs) {
    let c = &service.concentrator;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Concentrator Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⏱  Concentrator");
    println!("   ├─ Version: {:?}", service.version);
    println!(
        "   ├─ Frames per second: {} ({} ticks per frame)",
        c.frames_per_second,
        ticks_per_frame(c)
    );
    println!("   ├─ Lag / lead time: {}s / {}s", c.lag_time, c.lead_time);
    println!("   ├─ Downsampling: {}", c.downsampling_method.as_str());
    println!("   ├─ Publication cadence: {}", cadence(c));
    match publication_timeout_ms(c) {
        Some(ms) => println!("   ├─ Publication timeout: {} ms", ms),
        None => println!("   ├─ Publication timeout: infinite"),
    }
    println!(
        "   ├─ Real time: {}",
        if c.effective_use_local_clock() {
            "local clock"
        } else {
            "latest measurement"
        }
    );
    println!(
        "   ├─ Sorts by arrival: {}, preemptive publishing: {}",
        c.effective_allow_sorts_by_arrival(),
        c.allow_preemptive_publishing
    );
    println!("   └─ Expected measurements: {}", c.expected_measurements);

    println!("\n📡 Sources ({}, {} signals)", service.sources.len(), service.total_signals());
    for (i, source) in service.sources.iter().enumerate() {
        let is_last = i == service.sources.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {} ({} signals)", prefix, source.name, source.signal_count);
        if args.sources {
            println!(
                "   {}  └─ {} Hz, jitter {} ms, late {:.1}%, bad time {:.1}%",
                child_prefix,
                source.rate_hz,
                source.jitter_ms,
                source.late_probability * 100.0,
                source.bad_time_probability * 100.0
            );
        }
    }

    if !service.sinks.is_empty() {
        println!("\n📤 Sinks ({})", service.sinks.len());
        for (i, sink) in service.sinks.iter().enumerate() {
            let is_last = i == service.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            if args.sinks {
                println!(
                    "   {} {} ({:?}, queue {}) {:?}",
                    prefix, sink.name, sink.sink_type, sink.queue_capacity, sink.params
                );
            } else {
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::*;

    fn args(sources: bool, sinks: bool) -> InfoArgs {
        InfoArgs {
            config: "unused.toml".into(),
            json: true,
            sources,
            sinks,
        }
    }

    #[test]
    fn test_derived_values() {
        let mut c = ConcentratorConfig::new(30, 1.0, 0.5);
        assert_eq!(ticks_per_frame(&c), 333_333);
        assert_eq!(publication_timeout_ms(&c), Some(40));
        assert_eq!(cadence(&c), "frame rate timer");

        c.maximum_publication_timeout = Some(-1);
        c.processing_interval = 100;
        assert_eq!(publication_timeout_ms(&c), None);
        assert_eq!(cadence(&c), "every 100 ms");
    }

    #[test]
    fn test_json_info() {
        let file = write_config(SAMPLE_TOML);
        let service = load_config(file.path()).unwrap();

        let brief = serde_json::to_value(build_config_info(&service, &args(false, false))).unwrap();
        assert_eq!(brief["concentrator"]["frames_per_second"], 30);
        assert_eq!(brief["concentrator"]["ticks_per_frame"], 333_333);
        assert!(brief["sources"][0].get("rate_hz").is_none());
        assert!(brief.get("sinks").is_none());

        let full = serde_json::to_value(build_config_info(&service, &args(true, true))).unwrap();
        assert_eq!(full["sources"][1]["rate_hz"], 60.0);
        assert_eq!(full["sinks"][0]["sink_type"], "Log");
    }
}
