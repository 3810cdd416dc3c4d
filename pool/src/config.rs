use serde::Deserialize;

use stratum_core::Algorithm;

/// Everything the core reads to stand up a listener. DB connection
/// strings, payout wallets, and the rest belong to external collaborators
/// and never appear here.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub listen: String,
    pub metrics_listen: String,

    /// How long a new connection is given to declare its protocol before
    /// being dropped.
    #[serde(default = "default_detection_timeout_secs")]
    pub detection_timeout_secs: u64,
    /// How long a subscribed/authorized connection may sit without
    /// traffic before the server closes it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Starting difficulty assigned to a session before its first vardiff
    /// retarget.
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: f64,
    /// Target mean seconds between accepted shares that vardiff aims for.
    #[serde(default = "default_vardiff_target_share_secs")]
    pub vardiff_target_share_secs: f64,
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: f64,
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: f64,

    /// Number of raw bytes the server assigns as extranonce1 per session.
    #[serde(default = "default_extranonce1_size")]
    pub extranonce1_size: usize,
    /// Number of raw bytes a miner is expected to fill in as extranonce2.
    #[serde(default = "default_extranonce2_size")]
    pub extranonce2_size: usize,

    /// Per-coin hash algorithm selector, e.g. `"sha256d"`.
    #[serde(default = "default_algorithm_name")]
    pub algorithm: String,

    /// Bound on each session's outbound message queue before the server
    /// starts dropping stale `notify` broadcasts.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

fn default_detection_timeout_secs() -> u64 {
    5
}
fn default_idle_timeout_secs() -> u64 {
    120
}
fn default_initial_difficulty() -> f64 {
    1.0
}
fn default_vardiff_target_share_secs() -> f64 {
    10.0
}
fn default_min_difficulty() -> f64 {
    0.001
}
fn default_max_difficulty() -> f64 {
    1_000_000.0
}
fn default_extranonce1_size() -> usize {
    4
}
fn default_extranonce2_size() -> usize {
    4
}
fn default_algorithm_name() -> String {
    "sha256d".to_string()
}
fn default_outbound_queue_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3333".to_string(),
            metrics_listen: "0.0.0.0:9100".to_string(),
            detection_timeout_secs: default_detection_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            initial_difficulty: default_initial_difficulty(),
            vardiff_target_share_secs: default_vardiff_target_share_secs(),
            min_difficulty: default_min_difficulty(),
            max_difficulty: default_max_difficulty(),
            extranonce1_size: default_extranonce1_size(),
            extranonce2_size: default_extranonce2_size(),
            algorithm: default_algorithm_name(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Config {
    /// Defaults, then environment overrides, then an optional
    /// `pool_config.json` override file, then validation/clamping.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(l) = std::env::var("STRATUM_LISTEN") {
            cfg.listen = l;
        }
        if let Ok(m) = std::env::var("STRATUM_METRICS_LISTEN") {
            cfg.metrics_listen = m;
        }
        if let Ok(v) = std::env::var("STRATUM_DETECTION_TIMEOUT_SECS") {
            cfg.detection_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_DETECTION_TIMEOUT_SECS",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_IDLE_TIMEOUT_SECS") {
            cfg.idle_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_IDLE_TIMEOUT_SECS",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_INITIAL_DIFFICULTY") {
            cfg.initial_difficulty = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_INITIAL_DIFFICULTY",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_VARDIFF_TARGET_SHARE_SECS") {
            cfg.vardiff_target_share_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_VARDIFF_TARGET_SHARE_SECS",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_MIN_DIFFICULTY") {
            cfg.min_difficulty = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_MIN_DIFFICULTY",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_MAX_DIFFICULTY") {
            cfg.max_difficulty = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_MAX_DIFFICULTY",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_EXTRANONCE1_SIZE") {
            cfg.extranonce1_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_EXTRANONCE1_SIZE",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_EXTRANONCE2_SIZE") {
            cfg.extranonce2_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_EXTRANONCE2_SIZE",
            })?;
        }
        if let Ok(v) = std::env::var("STRATUM_ALGORITHM") {
            cfg.algorithm = v;
        }
        if let Ok(v) = std::env::var("STRATUM_OUTBOUND_QUEUE_CAPACITY") {
            cfg.outbound_queue_capacity = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "STRATUM_OUTBOUND_QUEUE_CAPACITY",
            })?;
        }

        if let Ok(txt) = std::fs::read_to_string("pool_config.json") {
            cfg = serde_json::from_str(&txt).map_err(ConfigError::Parse)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if Algorithm::from_str(&self.algorithm).is_none() {
            return Err(ConfigError::UnknownAlgorithm(self.algorithm.clone()));
        }
        if self.min_difficulty <= 0.0 || self.max_difficulty < self.min_difficulty {
            return Err(ConfigError::InvalidValue {
                field: "min_difficulty/max_difficulty",
            });
        }
        if self.initial_difficulty < self.min_difficulty || self.initial_difficulty > self.max_difficulty {
            return Err(ConfigError::InvalidValue {
                field: "initial_difficulty",
            });
        }
        if !(2..=8).contains(&self.extranonce1_size) {
            return Err(ConfigError::InvalidValue {
                field: "extranonce1_size",
            });
        }
        if self.extranonce2_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extranonce2_size",
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}")]
    InvalidValue { field: &'static str },
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("failed to parse pool_config.json: {0}")]
    Parse(serde_json::Error),
}
