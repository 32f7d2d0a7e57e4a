//! Machine configuration.
//!
//! Defaults suit embedding and tests. [`MachineConfig::from_env`] overrides
//! them from `LAC_*` environment variables for deployments.

use lac_core::CalculationDate;

use crate::case_manager::DEFAULT_SAMPLE_RATE;
use crate::error::ConfigError;

/// Default number of rule trigger lanes.
pub const DEFAULT_TRIGGER_WORKERS: usize = 4;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err("expected text or json".to_string()),
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_filter: "info".to_string(),
        }
    }
}

/// Configuration of a [`Machine`](crate::Machine).
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    /// Fraction of matching submissions routed to manual review anyway.
    pub sample_rate: f64,
    /// Date used for evaluations that carry none. Today when unset.
    pub root_reference_date: Option<CalculationDate>,
    /// Number of rule trigger lanes.
    pub trigger_workers: usize,
    /// Logging setup.
    pub log: LogConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            root_reference_date: None,
            trigger_workers: DEFAULT_TRIGGER_WORKERS,
            log: LogConfig::default(),
        }
    }
}

impl MachineConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `LAC_SAMPLE_RATE` (default: 0.10, between 0 and 1)
    /// - `LAC_ROOT_REFERENCE_DATE` (default: today, `YYYY-MM-DD`)
    /// - `LAC_TRIGGER_WORKERS` (default: 4, at least 1)
    /// - `LAC_LOG_FORMAT` (default: `text`, or `json`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("LAC_SAMPLE_RATE") {
            let rate: f64 = raw.trim().parse().map_err(|_| invalid("LAC_SAMPLE_RATE", &raw, "not a number"))?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid("LAC_SAMPLE_RATE", &raw, "must be between 0 and 1"));
            }
            config.sample_rate = rate;
        }

        if let Some(raw) = lookup("LAC_ROOT_REFERENCE_DATE") {
            let date = CalculationDate::parse(raw.trim())
                .map_err(|e| invalid("LAC_ROOT_REFERENCE_DATE", &raw, &e.to_string()))?;
            config.root_reference_date = Some(date);
        }

        if let Some(raw) = lookup("LAC_TRIGGER_WORKERS") {
            let workers: usize = raw
                .trim()
                .parse()
                .map_err(|_| invalid("LAC_TRIGGER_WORKERS", &raw, "not a whole number"))?;
            if workers == 0 {
                return Err(invalid("LAC_TRIGGER_WORKERS", &raw, "must be at least 1"));
            }
            config.trigger_workers = workers;
        }

        if let Some(raw) = lookup("LAC_LOG_FORMAT") {
            config.log.format = raw.trim().parse().map_err(|reason: String| invalid("LAC_LOG_FORMAT", &raw, &reason))?;
        }

        Ok(config)
    }

    /// The configured root reference date, or today.
    pub fn root_reference_date(&self) -> CalculationDate {
        self.root_reference_date.unwrap_or_else(CalculationDate::today)
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
