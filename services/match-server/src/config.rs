//! Server configuration.
//!
//! Loaded from YAML, overridden from the environment, then validated into a
//! [ValidatedConfig] before anything binds a socket.

use ludo_execution::{Rules, TurnPolicy};
use ludo_types::{Ruleset, RulesetError, RulesetPreset, TimeoutPolicy, MAX_SEATS, MIN_SEATS};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::Level;

pub const ENV_HOST: &str = "LUDO_HOST";
pub const ENV_PORT: &str = "LUDO_PORT";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    /// Board used for every match this server creates.
    #[serde(default = "default_ruleset_preset")]
    pub ruleset_preset: RulesetPreset,
    /// Full ruleset. Takes precedence over `ruleset_preset` when set.
    #[serde(default)]
    pub custom_ruleset: Option<Ruleset>,
    #[serde(default = "default_seats_per_match")]
    pub seats_per_match: usize,

    /// Unset means connected players may think forever.
    #[serde(default)]
    pub turn_timeout_ms: Option<u64>,
    #[serde(default = "default_on_turn_timeout")]
    pub on_turn_timeout: TimeoutPolicy,
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    #[serde(default = "default_on_disconnect")]
    pub on_disconnect: TimeoutPolicy,
    /// How long a finished match keeps answering resyncs before it is dropped.
    #[serde(default = "default_finished_linger_ms")]
    pub finished_linger_ms: u64,

    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// SQLite file receiving finished match records. Unset disables history.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    #[serde(default = "default_history_buffer")]
    pub history_buffer: usize,

    /// Fixes dice across restarts. Intended for local testing only.
    #[serde(default)]
    pub dice_seed: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9123
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ruleset_preset() -> RulesetPreset {
    RulesetPreset::Classic
}

fn default_seats_per_match() -> usize {
    MAX_SEATS
}

fn default_on_turn_timeout() -> TimeoutPolicy {
    TimeoutPolicy::AutoPlay
}

fn default_disconnect_grace_ms() -> u64 {
    30_000
}

fn default_on_disconnect() -> TimeoutPolicy {
    TimeoutPolicy::Forfeit
}

fn default_finished_linger_ms() -> u64 {
    60_000
}

fn default_mailbox_size() -> usize {
    64
}

fn default_broadcast_buffer() -> usize {
    256
}

fn default_outbound_buffer() -> usize {
    128
}

fn default_max_message_size() -> usize {
    16 * 1024
}

fn default_history_buffer() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            ruleset_preset: default_ruleset_preset(),
            custom_ruleset: None,
            seats_per_match: default_seats_per_match(),
            turn_timeout_ms: None,
            on_turn_timeout: default_on_turn_timeout(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            on_disconnect: default_on_disconnect(),
            finished_linger_ms: default_finished_linger_ms(),
            mailbox_size: default_mailbox_size(),
            broadcast_buffer: default_broadcast_buffer(),
            outbound_buffer: default_outbound_buffer(),
            max_message_size: default_max_message_size(),
            history_path: None,
            history_buffer: default_history_buffer(),
            dice_seed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("seats_per_match must be within 2..=4 (got {value})")]
    InvalidSeats { value: usize },
    #[error("invalid listen address {value}")]
    InvalidListenAddr { value: String },
    #[error("invalid ruleset: {0}")]
    InvalidRuleset(#[from] RulesetError),
    #[error("{key} is not a valid {expected}: {value}")]
    InvalidEnv {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

pub struct ValidatedConfig {
    pub listen_addr: SocketAddr,
    pub log_level: Level,
    pub log_json: bool,
    pub rules: Arc<Rules>,
    pub seats_per_match: usize,
    pub policy: TurnPolicy,
    pub finished_linger: Duration,
    pub mailbox_size: usize,
    pub broadcast_buffer: usize,
    pub outbound_buffer: usize,
    pub max_message_size: usize,
    pub history_path: Option<PathBuf>,
    pub history_buffer: usize,
    pub dice_seed: Option<u64>,
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("listen_addr", &self.listen_addr)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("ruleset", &self.rules.ruleset().name)
            .field("seats_per_match", &self.seats_per_match)
            .field("policy", &self.policy)
            .field("finished_linger", &self.finished_linger)
            .field("mailbox_size", &self.mailbox_size)
            .field("broadcast_buffer", &self.broadcast_buffer)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("max_message_size", &self.max_message_size)
            .field("history_path", &self.history_path)
            .field("history_buffer", &self.history_buffer)
            .field("dice_seed", &self.dice_seed)
            .finish()
    }
}

fn ensure_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value: 0 });
    }
    Ok(())
}

fn ensure_nonzero_u64(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Applies `LUDO_HOST` and `LUDO_PORT` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(raw) = lookup(ENV_PORT) {
            self.port = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_PORT,
                expected: "port",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn ruleset(&self) -> Ruleset {
        self.custom_ruleset
            .clone()
            .unwrap_or_else(|| Ruleset::preset(self.ruleset_preset))
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if !(MIN_SEATS..=MAX_SEATS).contains(&self.seats_per_match) {
            return Err(ConfigError::InvalidSeats {
                value: self.seats_per_match,
            });
        }
        if let Some(timeout) = self.turn_timeout_ms {
            ensure_nonzero_u64("turn_timeout_ms", timeout)?;
        }
        ensure_nonzero_u64("disconnect_grace_ms", self.disconnect_grace_ms)?;
        ensure_nonzero("mailbox_size", self.mailbox_size)?;
        ensure_nonzero("broadcast_buffer", self.broadcast_buffer)?;
        ensure_nonzero("outbound_buffer", self.outbound_buffer)?;
        ensure_nonzero("max_message_size", self.max_message_size)?;
        ensure_nonzero("history_buffer", self.history_buffer)?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        let listen_addr = format!("{}:{}", self.host, self.port);
        let listen_addr = listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr { value: listen_addr })?;
        let rules = Arc::new(Rules::new(self.ruleset())?);

        Ok(ValidatedConfig {
            listen_addr,
            log_level,
            log_json: self.log_json,
            rules,
            seats_per_match: self.seats_per_match,
            policy: TurnPolicy {
                turn_timeout: self.turn_timeout_ms.map(Duration::from_millis),
                on_turn_timeout: self.on_turn_timeout,
                disconnect_grace: Duration::from_millis(self.disconnect_grace_ms),
                on_disconnect: self.on_disconnect,
            },
            finished_linger: Duration::from_millis(self.finished_linger_ms),
            mailbox_size: self.mailbox_size,
            broadcast_buffer: self.broadcast_buffer,
            outbound_buffer: self.outbound_buffer,
            max_message_size: self.max_message_size,
            history_path: self.history_path,
            history_buffer: self.history_buffer,
            dice_seed: self.dice_seed,
        })
    }
}
