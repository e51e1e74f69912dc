//! config - timing and budgets
//!
//! defaults reproduce the classic demo pacing: 150 discovery passes 2s apart,
//! 2s between stream-open attempts and 2s between rounds. a JSON file can
//! override any subset, e.g. `{"pacing_ms": 0, "move_timeout_secs": 30}`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::game::MAX_ROUNDS;

/// all knobs of discovery, the move channel and the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// decisive rounds per match
    pub max_rounds: u32,
    /// discovery passes before giving up
    pub discovery_retries: u32,
    /// pause between discovery passes
    pub discovery_interval: Duration,
    /// pause between failed stream opens
    pub send_retry_interval: Duration,
    /// give up opening a stream after this long (`None`: retry forever)
    pub send_deadline: Option<Duration>,
    /// give up waiting for the opponent's move after this long (`None`: wait forever)
    pub move_timeout: Option<Duration>,
    /// pause between rounds
    pub pacing: Duration,
    /// bound on a single rendezvous request
    pub lookup_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            discovery_retries: 150,
            discovery_interval: Duration::from_secs(2),
            send_retry_interval: Duration::from_secs(2),
            send_deadline: Some(Duration::from_secs(120)),
            move_timeout: Some(Duration::from_secs(300)),
            pacing: Duration::from_secs(2),
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// on-disk overrides; absent fields keep their default
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimingFile {
    max_rounds: Option<u32>,
    discovery_retries: Option<u32>,
    discovery_interval_ms: Option<u64>,
    send_retry_interval_ms: Option<u64>,
    /// 0 disables the deadline
    send_deadline_secs: Option<u64>,
    /// 0 disables the timeout
    move_timeout_secs: Option<u64>,
    pacing_ms: Option<u64>,
    lookup_timeout_secs: Option<u64>,
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Timing {
    /// defaults with the overrides found in a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: TimingFile = serde_json::from_str(json)?;
        let mut timing = Self::default();
        if let Some(v) = file.max_rounds {
            timing.max_rounds = v;
        }
        if let Some(v) = file.discovery_retries {
            timing.discovery_retries = v;
        }
        if let Some(v) = file.discovery_interval_ms {
            timing.discovery_interval = Duration::from_millis(v);
        }
        if let Some(v) = file.send_retry_interval_ms {
            timing.send_retry_interval = Duration::from_millis(v);
        }
        if let Some(v) = file.send_deadline_secs {
            timing.send_deadline = optional_secs(v);
        }
        if let Some(v) = file.move_timeout_secs {
            timing.move_timeout = optional_secs(v);
        }
        if let Some(v) = file.pacing_ms {
            timing.pacing = Duration::from_millis(v);
        }
        if let Some(v) = file.lookup_timeout_secs {
            timing.lookup_timeout = Duration::from_secs(v);
        }
        timing.validate()?;
        Ok(timing)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be > 0".to_string()));
        }
        if self.lookup_timeout.is_zero() {
            return Err(ConfigError::Invalid("lookup_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
