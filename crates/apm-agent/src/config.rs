// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;

use crate::errors::ConfigError;
use crate::metric::DEFAULT_MAX_METRIC_KEYS;
use crate::trace::DEFAULT_MAX_TRACES;

const DEFAULT_HOST: &str = "https://checkin.scoutapp.com";
const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
const DEFAULT_REPORT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Reporting key; without one nothing is sent.
    pub key: Option<String>,
    pub name: Option<String>,
    /// Master switch, `APM_MONITOR`.
    pub monitor: bool,
    /// Collector base URL.
    pub host: String,
    pub hostname: String,
    pub log_level: String,
    /// how often the store ticks, in seconds
    pub tick_interval_secs: u64,
    pub max_traces: usize,
    pub max_metric_keys: usize,
    /// timeout for each report request, in seconds
    pub report_timeout_secs: u64,
    pub compression_level: i32,
    pub proxy_url: Option<String>,
}

impl Default for Config {
    /// Collects in memory and never reports.
    fn default() -> Self {
        Config {
            key: None,
            name: None,
            monitor: false,
            host: DEFAULT_HOST.to_string(),
            hostname: "unknown".to_string(),
            log_level: "info".to_string(),
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            max_traces: DEFAULT_MAX_TRACES,
            max_metric_keys: DEFAULT_MAX_METRIC_KEYS,
            report_timeout_secs: DEFAULT_REPORT_TIMEOUT_SECS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            proxy_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Config {
            key: lookup("APM_KEY").filter(|key| !key.trim().is_empty()),
            name: lookup("APM_NAME"),
            monitor: parse_bool(&lookup, "APM_MONITOR")?.unwrap_or(true),
            host: lookup("APM_HOST")
                .map(|host| host.trim_end_matches('/').to_string())
                .unwrap_or(defaults.host),
            hostname: lookup("APM_HOSTNAME")
                .or_else(|| lookup("HOSTNAME"))
                .unwrap_or(defaults.hostname),
            log_level: lookup("APM_LOG_LEVEL")
                .map(|level| level.to_lowercase())
                .unwrap_or(defaults.log_level),
            tick_interval_secs: parse(&lookup, "APM_TICK_INTERVAL_SECS")?
                .unwrap_or(defaults.tick_interval_secs),
            max_traces: parse(&lookup, "APM_MAX_TRACES")?.unwrap_or(defaults.max_traces),
            max_metric_keys: parse(&lookup, "APM_MAX_METRIC_KEYS")?
                .unwrap_or(defaults.max_metric_keys),
            report_timeout_secs: parse(&lookup, "APM_REPORT_TIMEOUT_SECS")?
                .unwrap_or(defaults.report_timeout_secs),
            compression_level: parse(&lookup, "APM_COMPRESSION_LEVEL")?
                .unwrap_or(defaults.compression_level),
            proxy_url: lookup("APM_HTTPS_PROXY").or_else(|| lookup("HTTPS_PROXY")),
        })
    }

    /// Reporting requires both the master switch and a key.
    #[must_use]
    pub fn monitor_enabled(&self) -> bool {
        self.monitor && self.key.is_some()
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::env;

    use crate::config::Config;
    use crate::errors::ConfigError;

    const VARS: [&str; 6] = [
        "APM_KEY",
        "APM_NAME",
        "APM_MONITOR",
        "APM_HOST",
        "APM_TICK_INTERVAL_SECS",
        "APM_MAX_TRACES",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_key() {
        clear();
        let config = Config::from_env().expect("Failed to read config");
        assert_eq!(config.key, None);
        assert!(config.monitor);
        assert!(!config.monitor_enabled());
        assert_eq!(config.host, "https://checkin.scoutapp.com");
        assert_eq!(config.tick_interval_secs, 10);
        assert_eq!(config.max_traces, 10);
    }

    #[test]
    #[serial]
    fn test_reads_key_and_overrides() {
        clear();
        env::set_var("APM_KEY", "_not_a_real_key_");
        env::set_var("APM_NAME", "shop");
        env::set_var("APM_HOST", "http://localhost:9000/");
        env::set_var("APM_TICK_INTERVAL_SECS", "2");
        let config = Config::from_env().expect("Failed to read config");
        assert_eq!(config.key.as_deref(), Some("_not_a_real_key_"));
        assert_eq!(config.name.as_deref(), Some("shop"));
        assert_eq!(config.host, "http://localhost:9000");
        assert_eq!(config.tick_interval_secs, 2);
        assert!(config.monitor_enabled());
        clear();
    }

    #[test]
    #[serial]
    fn test_monitor_switch_disables_reporting() {
        clear();
        env::set_var("APM_KEY", "_not_a_real_key_");
        env::set_var("APM_MONITOR", "false");
        let config = Config::from_env().expect("Failed to read config");
        assert!(!config.monitor_enabled());
        clear();
    }

    #[test]
    #[serial]
    fn test_rejects_malformed_number() {
        clear();
        env::set_var("APM_MAX_TRACES", "ten");
        let err = Config::from_env().expect_err("Malformed number should be refused");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "APM_MAX_TRACES",
                ..
            }
        ));
        assert_eq!(err.to_string(), "invalid value for APM_MAX_TRACES: \"ten\"");
        clear();
    }

    #[test]
    fn test_from_lookup_blank_key_is_absent() {
        let config = Config::from_lookup(|name| match name {
            "APM_KEY" => Some("  ".to_string()),
            "HOSTNAME" => Some("web-1".to_string()),
            _ => None,
        })
        .expect("Failed to read config");
        assert_eq!(config.key, None);
        assert_eq!(config.hostname, "web-1");
    }

    #[test]
    fn test_default_is_disabled() {
        assert!(!Config::default().monitor_enabled());
    }
}
