//! Configuration validation.
//!
//! Rules:
//! - concentrator settings pass their field rules (rate, lag, lead, timeouts)
//! - source names unique and non-empty, rate_hz > 0
//! - probabilities within [0, 1], jitter non-negative
//! - sink names unique and non-empty, file sinks carry a `path`

use std::collections::HashSet;

use contracts::{ConcentratorConfig, ContractError, ServiceConfig, SinkType};
use ::validator::Validate;

/// Validate a [`ServiceConfig`].
///
/// Returns the first error encountered, or `Ok(())`.
pub fn validate(config: &ServiceConfig) -> Result<(), ContractError> {
    validate_concentrator(&config.concentrator)?;
    validate_sources(config)?;
    validate_sinks(config)?;
    Ok(())
}

/// Validate concentrator settings on their own.
pub fn validate_concentrator(concentrator: &ConcentratorConfig) -> Result<(), ContractError> {
    if let Err(errors) = concentrator.validate() {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some((field, errs)) = fields.into_iter().next() {
            let message = errs
                .first()
                .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                .unwrap_or_else(|| "invalid value".to_string());
            return Err(ContractError::config_validation(
                format!("concentrator.{field}"),
                message,
            ));
        }
        return Err(ContractError::config_validation(
            "concentrator",
            errors.to_string(),
        ));
    }

    for (field, value) in [
        ("lag_time", concentrator.lag_time),
        ("lead_time", concentrator.lead_time),
    ] {
        if !value.is_finite() {
            return Err(ContractError::config_validation(
                format!("concentrator.{field}"),
                format!("{field} must be finite"),
            ));
        }
    }

    Ok(())
}

fn validate_sources(config: &ServiceConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();

    for (idx, source) in config.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sources[{idx}].name"),
                "source name cannot be empty",
            ));
        }
        if !seen.insert(source.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sources[name={}]", source.name),
                "duplicate source name",
            ));
        }
        if source.rate_hz <= 0.0 || !source.rate_hz.is_finite() {
            return Err(ContractError::config_validation(
                format!("sources[{}].rate_hz", source.name),
                format!("rate_hz must be > 0, got {}", source.rate_hz),
            ));
        }
        if source.signal_count == 0 {
            return Err(ContractError::config_validation(
                format!("sources[{}].signal_count", source.name),
                "signal_count must be > 0",
            ));
        }
        if source.jitter_ms < 0.0 {
            return Err(ContractError::config_validation(
                format!("sources[{}].jitter_ms", source.name),
                format!("jitter_ms must be >= 0, got {}", source.jitter_ms),
            ));
        }
        for (field, p) in [
            ("late_probability", source.late_probability),
            ("bad_time_probability", source.bad_time_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ContractError::config_validation(
                    format!("sources[{}].{field}", source.name),
                    format!("{field} must be within [0, 1], got {p}"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_sinks(config: &ServiceConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();

    for (idx, sink) in config.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be > 0",
            ));
        }
        if sink.sink_type == SinkType::File && !sink.params.contains_key("path") {
            return Err(ContractError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "file sink requires a path",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConfigVersion, SinkConfig, SourceConfig};

    fn minimal_config() -> ServiceConfig {
        ServiceConfig {
            version: ConfigVersion::V1,
            concentrator: ConcentratorConfig::new(30, 2.0, 1.0),
            sources: vec![SourceConfig {
                name: "PMU1".into(),
                signal_count: 4,
                rate_hz: 30.0,
                jitter_ms: 5.0,
                late_probability: 0.0,
                bad_time_probability: 0.0,
                clock_offset_ms: 0.0,
            }],
            sinks: vec![SinkConfig {
                name: "log".into(),
                sink_type: SinkType::Log,
                queue_capacity: 100,
                params: Default::default(),
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_invalid_frame_rate() {
        let mut config = minimal_config();
        config.concentrator.frames_per_second = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("frames_per_second must be > 0"), "got: {err}");
    }

    #[test]
    fn test_invalid_lag_time() {
        let mut config = minimal_config();
        config.concentrator.lag_time = 0.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("concentrator.lag_time"), "got: {err}");
    }

    #[test]
    fn test_invalid_publication_timeout() {
        let mut config = minimal_config();
        config.concentrator.maximum_publication_timeout = Some(-2);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("maximum_publication_timeout"), "got: {err}");

        config.concentrator.maximum_publication_timeout = Some(-1);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_source_name() {
        let mut config = minimal_config();
        config.sources.push(config.sources[0].clone());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate source name"), "got: {err}");
    }

    #[test]
    fn test_invalid_source_rate() {
        let mut config = minimal_config();
        config.sources[0].rate_hz = -5.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("rate_hz must be > 0"), "got: {err}");
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut config = minimal_config();
        config.sources[0].late_probability = 1.5;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("late_probability"), "got: {err}");
    }

    #[test]
    fn test_empty_sink_name() {
        let mut config = minimal_config();
        config.sinks[0].name = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("cannot be empty"), "got: {err}");
    }

    #[test]
    fn test_file_sink_requires_path() {
        let mut config = minimal_config();
        config.sinks[0].sink_type = SinkType::File;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("requires a path"), "got: {err}");
    }
}
