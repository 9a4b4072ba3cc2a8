//! Environment-driven configuration for RouteWatch.
//!
//! Each option is loaded at most once, on first access, from an environment
//! variable. Missing or invalid values fall back to the documented default
//! with a logged warning; the process never fails because of a bad option.

use once_cell::sync::Lazy;
use std::time::Duration;
use tracing::warn;

/// Window over which all moving statistics are collected, and the eviction
/// cutoff for stale graph data.
pub static STATISTICS_PERIOD: Lazy<Duration> =
    Lazy::new(|| load("STATISTICS_PERIOD", Duration::from_secs(3 * 24 * 3600), parse_duration));

/// Enables periodic logging of traceroute ingestion progress.
pub static LOG_TRACEROUTE_PROGRESS: Lazy<bool> =
    Lazy::new(|| load("LOG_TRACEROUTE_PROGRESS", false, parse_flag));

/// Directory holding cached historical measurement downloads.
pub static CACHE_DIR: Lazy<String> =
    Lazy::new(|| load("CACHE_DIR", ".cache".to_string(), |v| Ok(v.to_string())));

/// How long cached measurement files stay fresh.
pub static CACHE_DURATION: Lazy<Duration> =
    Lazy::new(|| load("CACHE_DURATION", Duration::from_secs(12 * 3600), parse_duration));

/// Minimum per-source fractional weight for an edge to survive the cleaned
/// projection.
pub static MIN_CLEAN_EDGE_WEIGHT: Lazy<f64> =
    Lazy::new(|| load("MIN_CLEAN_EDGE_WEIGHT", 0.1, parse_float));

/// How often the probe catalog is re-fetched from the measurement platform.
pub static PROBE_COLLECTION_REFRESH_PERIOD: Lazy<Duration> = Lazy::new(|| {
    load(
        "PROBE_COLLECTION_REFRESH_PERIOD",
        Duration::from_secs(24 * 3600),
        parse_duration,
    )
});

/// Maximum accepted size for a request body, in bytes.
pub static REQUEST_BYTE_LIMIT: Lazy<usize> =
    Lazy::new(|| load("REQUEST_BYTE_LIMIT", 4096, |v| v.parse().map_err(|_| "expected an integer")));

/// Measurement ids preloaded from cache at startup for local development.
pub static ATLAS_DEBUG_MEASUREMENTS: Lazy<Vec<u64>> = Lazy::new(|| {
    load(
        "ATLAS_DEBUG_MEASUREMENTS",
        vec![47_072_659, 47_072_660],
        parse_int_list,
    )
});

/// How often stale nodes, edges, and probe-usage entries are evicted.
pub static CLEANUP_PERIOD: Lazy<Duration> =
    Lazy::new(|| load("CLEANUP_PERIOD", Duration::from_secs(24 * 3600), parse_duration));

/// Server run mode; "release" binds port 80, anything else binds 8080.
pub static SERVER_MODE: Lazy<String> =
    Lazy::new(|| load("SERVER_MODE", "dev".to_string(), |v| Ok(v.to_string())));

fn load<T, F>(key: &str, default: T, parse: F) -> T
where
    T: std::fmt::Debug,
    F: FnOnce(&str) -> Result<T, &'static str>,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };

    match parse(raw.trim()) {
        Ok(value) => value,
        Err(reason) => {
            warn!("Invalid value {raw:?} for {key} ({reason}); using default {default:?}");
            default
        }
    }
}

// True and false options are taken from the YAML 1.1 standard for booleans.
const TRUE_OPTIONS: [&str; 4] = ["true", "yes", "on", "y"];
const FALSE_OPTIONS: [&str; 4] = ["false", "no", "off", "n"];

fn parse_flag(value: &str) -> Result<bool, &'static str> {
    let lowered = value.to_ascii_lowercase();

    if TRUE_OPTIONS.contains(&lowered.as_str()) {
        Ok(true)
    } else if FALSE_OPTIONS.contains(&lowered.as_str()) {
        Ok(false)
    } else {
        Err("expected one of true/yes/on/y/false/no/off/n")
    }
}

fn parse_duration(value: &str) -> Result<Duration, &'static str> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| "expected a whole number of seconds")
}

fn parse_float(value: &str) -> Result<f64, &'static str> {
    value.parse().map_err(|_| "expected a floating point number")
}

fn parse_int_list(value: &str) -> Result<Vec<u64>, &'static str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.parse().map_err(|_| "expected comma-separated integers"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_follows_yaml_booleans() {
        for option in ["true", "yes", "on", "y", "Yes", "ON"] {
            assert_eq!(parse_flag(option), Ok(true), "{option}");
        }
        for option in ["false", "no", "off", "n", "No", "OFF"] {
            assert_eq!(parse_flag(option), Ok(false), "{option}");
        }
        assert!(parse_flag("enabled").is_err());
        assert!(parse_flag("1").is_err());
    }

    #[test]
    fn durations_are_whole_seconds() {
        assert_eq!(parse_duration("86400"), Ok(Duration::from_secs(86400)));
        assert!(parse_duration("1.5").is_err());
        assert!(parse_duration("-3").is_err());
    }

    #[test]
    fn int_lists_are_comma_separated() {
        assert_eq!(parse_int_list("47072659,47072660"), Ok(vec![47072659, 47072660]));
        assert_eq!(parse_int_list("1, 2, 3"), Ok(vec![1, 2, 3]));
        assert_eq!(parse_int_list(""), Ok(Vec::new()));
        assert!(parse_int_list("1,x").is_err());
    }
}
