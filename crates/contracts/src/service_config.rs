//! Service configuration: concentrator settings plus surrounding pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ConcentratorConfig;

/// Configuration version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete service configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Concentrator settings
    pub concentrator: ConcentratorConfig,

    /// Measurement sources feeding the concentrator
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Output routing
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl ServiceConfig {
    /// Total signals across all sources.
    pub fn total_signals(&self) -> u32 {
        self.sources.iter().map(|s| s.signal_count).sum()
    }
}

/// Simulated measurement source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, used as the key source acronym
    pub name: String,

    /// Number of signals the source reports each sample
    #[serde(default = "default_signal_count")]
    pub signal_count: u32,

    /// Samples per second
    pub rate_hz: f64,

    /// Maximum random delivery delay in milliseconds
    #[serde(default)]
    pub jitter_ms: f64,

    /// Probability a sample is delivered after the lag window
    #[serde(default)]
    pub late_probability: f64,

    /// Probability a sample is flagged with a bad timestamp
    #[serde(default)]
    pub bad_time_probability: f64,

    /// Constant clock offset of the device in milliseconds
    #[serde(default)]
    pub clock_offset_ms: f64,
}

fn default_signal_count() -> u32 {
    1
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log summary line per frame
    Log,
    /// JSON-lines file
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_defaults() {
        let json = r#"{ "name": "PMU1", "rate_hz": 30.0 }"#;
        let source: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(source.signal_count, 1);
        assert_eq!(source.jitter_ms, 0.0);
    }

    #[test]
    fn test_total_signals() {
        let config = ServiceConfig {
            version: ConfigVersion::V1,
            concentrator: ConcentratorConfig::new(30, 2.0, 1.0),
            sources: vec![
                SourceConfig {
                    name: "A".into(),
                    signal_count: 4,
                    rate_hz: 30.0,
                    jitter_ms: 0.0,
                    late_probability: 0.0,
                    bad_time_probability: 0.0,
                    clock_offset_ms: 0.0,
                },
                SourceConfig {
                    name: "B".into(),
                    signal_count: 6,
                    rate_hz: 30.0,
                    jitter_ms: 5.0,
                    late_probability: 0.0,
                    bad_time_probability: 0.0,
                    clock_offset_ms: 0.0,
                },
            ],
            sinks: vec![],
        };
        assert_eq!(config.total_signals(), 10);
    }
}
