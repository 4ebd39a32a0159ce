//! Runtime configuration and validation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ListDescriptor;

fn default_num_schedulers() -> usize {
    2
}
fn default_num_resolvers() -> usize {
    40
}
fn default_num_reconcilers() -> usize {
    20
}
fn default_cache_hours() -> u64 {
    1
}
fn default_compaction_watermark() -> f64 {
    8_100_000.0 * 1.3
}
fn default_health_scan_secs() -> u64 {
    5
}
fn default_telemetry_secs() -> u64 {
    5
}
fn default_compaction_secs() -> u64 {
    300
}

/// Top-level configuration, loaded from a TOML file by the daemon binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub firehose_host: String,
    pub api_host: String,
    pub credentials_path: String,
    pub cache_path: String,

    #[serde(default)]
    pub expire_cache: bool,
    #[serde(default = "default_cache_hours")]
    pub cache_hours: u64,

    #[serde(default = "default_num_schedulers")]
    pub num_schedulers: usize,
    #[serde(default = "default_num_resolvers")]
    pub num_resolvers: usize,
    #[serde(default = "default_num_reconcilers")]
    pub num_reconcilers: usize,

    #[serde(default = "default_compaction_watermark")]
    pub compaction_watermark: f64,
    #[serde(default = "default_health_scan_secs")]
    pub health_scan_secs: u64,
    #[serde(default = "default_telemetry_secs")]
    pub telemetry_secs: u64,
    #[serde(default = "default_compaction_secs")]
    pub compaction_secs: u64,

    #[serde(default)]
    pub lists: Vec<ListDescriptor>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            firehose_host: "wss://bsky.network".into(),
            api_host: "https://bsky.social".into(),
            credentials_path: "credentials.yaml".into(),
            cache_path: "cache.db".into(),
            expire_cache: true,
            cache_hours: default_cache_hours(),
            num_schedulers: default_num_schedulers(),
            num_resolvers: default_num_resolvers(),
            num_reconcilers: default_num_reconcilers(),
            compaction_watermark: default_compaction_watermark(),
            health_scan_secs: default_health_scan_secs(),
            telemetry_secs: default_telemetry_secs(),
            compaction_secs: default_compaction_secs(),
            lists: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl RuntimeConfig {
    /// Validate the configuration, returning every issue found rather than
    /// failing on the first one.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if !(self.firehose_host.starts_with("ws://") || self.firehose_host.starts_with("wss://")) {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "firehose_host".into(),
                message: "must start with ws:// or wss://".into(),
            });
        }
        if !(self.api_host.starts_with("http://") || self.api_host.starts_with("https://")) {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "api_host".into(),
                message: "must start with http:// or https://".into(),
            });
        }
        if self.credentials_path.trim().is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "credentials_path".into(),
                message: "must not be empty".into(),
            });
        }
        if self.cache_path.trim().is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache_path".into(),
                message: "must not be empty".into(),
            });
        }
        if self.num_schedulers == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "num_schedulers".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.num_resolvers == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "num_resolvers".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.num_reconcilers == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "num_reconcilers".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.expire_cache && self.cache_hours == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache_hours".into(),
                message: "must be greater than zero when expire_cache is set".into(),
            });
        }
        if self.compaction_watermark <= 0.0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "compaction_watermark".into(),
                message: "non-positive watermark disables compaction entirely".into(),
            });
        }

        let mut seen_keys = std::collections::HashSet::new();
        for list in &self.lists {
            if !seen_keys.insert(list.key.0.clone()) {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "lists".into(),
                    message: format!("duplicate list key {:?}", list.key.0),
                });
            }
            if list.name.trim().is_empty() {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "lists".into(),
                    message: format!("list {:?} has an empty name", list.key.0),
                });
            }
            if list.follows_threshold.is_none()
                && list.followers_threshold.is_none()
                && list.word_list_path.is_none()
            {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "lists".into(),
                    message: format!(
                        "list {:?} has no thresholds and no word list; it will never match anything",
                        list.key.0
                    ),
                });
            }
        }
        if self.lists.is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "lists".into(),
                message: "no lists configured".into(),
            });
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigError]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}
