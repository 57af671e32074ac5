use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::limits::*;
use crate::model::Ms;
use crate::tenant::TenantSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Parse { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: &'static str },
}

/// Process configuration, read from `DRIVETIME_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub hold_ttl_ms: Ms,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub slot_len_ms: Ms,
    pub horizon_ms: Ms,
    pub full_recalc_interval: Duration,
    pub recalc_queue_capacity: usize,
    /// Pause before retry `n` of a failed regeneration is `n` times this.
    pub recalc_backoff: Duration,
    pub metrics_port: Option<u16>,
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            hold_ttl_ms: DEFAULT_HOLD_TTL_MS,
            sweep_interval: Duration::from_secs(30),
            compact_threshold: 1000,
            slot_len_ms: 30 * MINUTE_MS,
            horizon_ms: 28 * DAY_MS,
            full_recalc_interval: Duration::from_secs(3600),
            recalc_queue_capacity: 1024,
            recalc_backoff: Duration::from_millis(500),
            metrics_port: None,
            api_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or empty variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(bind) = get("DRIVETIME_BIND") {
            config.bind = bind;
        }
        if let Some(port) = parse(&get, "DRIVETIME_PORT")? {
            config.port = port;
        }
        if let Some(dir) = get("DRIVETIME_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse::<i64>(&get, "DRIVETIME_HOLD_TTL_SECS")? {
            let ttl = secs.saturating_mul(SECOND_MS);
            if !(MIN_HOLD_TTL_MS..=MAX_HOLD_TTL_MS).contains(&ttl) {
                return Err(ConfigError::OutOfRange {
                    var: "DRIVETIME_HOLD_TTL_SECS",
                    reason: "must be between 10 seconds and 2 hours",
                });
            }
            config.hold_ttl_ms = ttl;
        }
        if let Some(secs) = parse::<u64>(&get, "DRIVETIME_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = positive_secs("DRIVETIME_SWEEP_INTERVAL_SECS", secs)?;
        }
        if let Some(n) = parse(&get, "DRIVETIME_COMPACT_THRESHOLD")? {
            config.compact_threshold = n;
        }
        if let Some(minutes) = parse::<i64>(&get, "DRIVETIME_SLOT_MINUTES")? {
            let len = minutes.saturating_mul(MINUTE_MS);
            if !(MIN_SLOT_LEN_MS..=DAY_MS).contains(&len) {
                return Err(ConfigError::OutOfRange {
                    var: "DRIVETIME_SLOT_MINUTES",
                    reason: "must be between 5 minutes and one day",
                });
            }
            config.slot_len_ms = len;
        }
        if let Some(days) = parse::<i64>(&get, "DRIVETIME_HORIZON_DAYS")? {
            let horizon = days.saturating_mul(DAY_MS);
            if !(DAY_MS..=MAX_GENERATION_HORIZON_MS).contains(&horizon) {
                return Err(ConfigError::OutOfRange {
                    var: "DRIVETIME_HORIZON_DAYS",
                    reason: "must be between 1 and 180 days",
                });
            }
            config.horizon_ms = horizon;
        }
        if let Some(secs) = parse::<u64>(&get, "DRIVETIME_FULL_RECALC_SECS")? {
            config.full_recalc_interval = positive_secs("DRIVETIME_FULL_RECALC_SECS", secs)?;
        }
        if let Some(capacity) = parse::<usize>(&get, "DRIVETIME_RECALC_QUEUE_CAPACITY")? {
            if capacity == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "DRIVETIME_RECALC_QUEUE_CAPACITY",
                    reason: "must be positive",
                });
            }
            config.recalc_queue_capacity = capacity;
        }
        config.metrics_port = parse(&get, "DRIVETIME_METRICS_PORT")?;
        config.api_token = get("DRIVETIME_API_TOKEN");
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tenant_settings(&self) -> TenantSettings {
        TenantSettings {
            hold_ttl_ms: self.hold_ttl_ms,
            sweep_interval: self.sweep_interval,
            compact_threshold: self.compact_threshold,
            ..TenantSettings::default()
        }
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Parse { var, value })
        })
        .transpose()
}

fn positive_secs(var: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::OutOfRange {
            var,
            reason: "must be positive",
        });
    }
    Ok(Duration::from_secs(secs))
}
