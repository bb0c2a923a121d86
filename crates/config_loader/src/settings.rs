//! `key=value; key=value` settings strings.
//!
//! Adapter layers describe a concentrator inline, e.g.
//! `framesPerSecond=30; lagTime=3; leadTime=1; downsamplingMethod=Closest`.
//! Keys are case-insensitive.

use std::collections::HashMap;
use std::str::FromStr;

use contracts::{ConcentratorConfig, ContractError, DownsamplingMethod};
use tracing::warn;

const FRAMES_PER_SECOND: &str = "framespersecond";
const LAG_TIME: &str = "lagtime";
const LEAD_TIME: &str = "leadtime";

/// Split a settings string into lower-cased keys and trimmed values.
///
/// Empty segments are skipped; a later duplicate key overrides an earlier one.
pub fn parse_key_values(settings: &str) -> Result<HashMap<String, String>, ContractError> {
    let mut values = HashMap::new();

    for segment in settings.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            ContractError::config_parse(format!("malformed setting '{segment}', expected key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ContractError::config_parse(format!(
                "malformed setting '{segment}', empty key"
            )));
        }
        let value = value.trim().trim_start_matches('{').trim_end_matches('}').trim();
        values.insert(key.to_lowercase(), value.to_string());
    }

    Ok(values)
}

/// Build a [`ConcentratorConfig`] from a settings string.
///
/// `framesPerSecond`, `lagTime` and `leadTime` are required. An unknown
/// `downsamplingMethod` falls back to `LastReceived`.
pub fn parse_settings(settings: &str) -> Result<ConcentratorConfig, ContractError> {
    let values = parse_key_values(settings)?;

    let required = |key: &str, name: &str| {
        values.get(key).ok_or_else(|| {
            ContractError::config_validation(name, format!("required setting '{name}' is missing"))
        })
    };

    let mut config = ConcentratorConfig::new(
        parse_value(required(FRAMES_PER_SECOND, "framesPerSecond")?, "framesPerSecond")?,
        parse_value(required(LAG_TIME, "lagTime")?, "lagTime")?,
        parse_value(required(LEAD_TIME, "leadTime")?, "leadTime")?,
    );

    for (key, value) in &values {
        match key.as_str() {
            FRAMES_PER_SECOND | LAG_TIME | LEAD_TIME => {}
            "timeresolution" => config.time_resolution = parse_value(value, "timeResolution")?,
            "roundtonearesttimestamp" => {
                config.round_to_nearest_timestamp = parse_bool(value, "roundToNearestTimestamp")?
            }
            "downsamplingmethod" => {
                config.downsampling_method = value.parse().unwrap_or_else(|_| {
                    warn!(value = %value, "unknown downsampling method, using LastReceived");
                    DownsamplingMethod::LastReceived
                })
            }
            "processinginterval" => {
                config.processing_interval = parse_value(value, "processingInterval")?
            }
            "useprecisiontimer" => {
                config.use_precision_timer = parse_bool(value, "usePrecisionTimer")?
            }
            "allowpreemptivepublishing" => {
                config.allow_preemptive_publishing = parse_bool(value, "allowPreemptivePublishing")?
            }
            "allowsortsbyarrival" => {
                config.allow_sorts_by_arrival = parse_bool(value, "allowSortsByArrival")?
            }
            "ignorebadtimestamps" => {
                config.ignore_bad_timestamps = parse_bool(value, "ignoreBadTimestamps")?
            }
            "processbyreceivedtimestamp" => {
                config.process_by_received_timestamp =
                    parse_bool(value, "processByReceivedTimestamp")?
            }
            "uselocalclockasrealtime" => {
                config.use_local_clock_as_real_time = parse_bool(value, "useLocalClockAsRealTime")?
            }
            "tracklatestmeasurements" => {
                config.track_latest_measurements = parse_bool(value, "trackLatestMeasurements")?
            }
            "trackpublishedtimestamp" => {
                config.track_published_timestamp = parse_bool(value, "trackPublishedTimestamp")?
            }
            "performtimestampreasonabilitycheck" => {
                config.perform_timestamp_reasonability_check =
                    parse_bool(value, "performTimestampReasonabilityCheck")?
            }
            "expectedmeasurements" => {
                config.expected_measurements = parse_value(value, "expectedMeasurements")?
            }
            "maximumpublicationtimeout" => {
                config.maximum_publication_timeout =
                    Some(parse_value(value, "maximumPublicationTimeout")?)
            }
            "externaleventtimeout" => {
                config.external_event_timeout = Some(parse_value(value, "externalEventTimeout")?)
            }
            other => warn!(key = other, "ignoring unknown concentrator setting"),
        }
    }

    crate::validator::validate_concentrator(&config)?;
    Ok(config)
}

fn parse_value<T>(value: &str, name: &str) -> Result<T, ContractError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ContractError::config_parse(format!("setting '{name}' = '{value}': {e}")))
}

/// Accepts `true`/`false`, `yes`/`no`, `1`/`0` in any case.
fn parse_bool(value: &str, name: &str) -> Result<bool, ContractError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ContractError::config_parse(format!(
            "setting '{name}' = '{value}': expected a boolean"
        ))),
    }
}
