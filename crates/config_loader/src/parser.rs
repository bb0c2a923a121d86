//! Configuration parsing.
//!
//! TOML is the primary format; JSON is accepted for generated files.

use contracts::{ContractError, ServiceConfig};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<ServiceConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<ServiceConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<ServiceConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DownsamplingMethod, SinkType};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[concentrator]
frames_per_second = 30
lag_time = 2.0
lead_time = 1.0
downsampling_method = "closest"

[[sources]]
name = "PMU1"
signal_count = 8
rate_hz = 30.0

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.concentrator.frames_per_second, 30);
        assert_eq!(config.concentrator.downsampling_method, DownsamplingMethod::Closest);
        assert_eq!(config.sources[0].signal_count, 8);
        assert_eq!(config.sinks[0].sink_type, SinkType::Log);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "concentrator": { "frames_per_second": 60, "lag_time": 0.5, "lead_time": 0.5 },
            "sources": [{ "name": "PMU1", "rate_hz": 60.0 }],
            "sinks": [{ "name": "file", "sink_type": "file", "params": { "path": "out.jsonl" } }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        assert_eq!(result.unwrap().sinks[0].params["path"], "out.jsonl");
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_missing_required_setting() {
        let content = r#"
[concentrator]
frames_per_second = 30
lag_time = 2.0
"#;
        let err = parse_toml(content).unwrap_err().to_string();
        assert!(err.contains("lead_time"), "got: {err}");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
