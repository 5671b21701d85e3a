// ABOUTME: Configuration loading and validation for the relay agent.
// ABOUTME: TOML file with env var expansion; every section is optional and falls back to defaults.

use crate::error::{AgentError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Marker text the chat UI shows in its modal portal once the login is gone.
pub const DEFAULT_SESSION_EXPIRED_MARKER: &str = "Your session has expired";

/// Top-level configuration structure for coven-relay-agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayEndpoint,
    #[serde(default)]
    pub agent: AgentTuning,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Where the dispatcher listens.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayEndpoint {
    /// WebSocket URL of the dispatcher (e.g., "ws://127.0.0.1:3001").
    #[serde(default = "default_url")]
    pub url: String,
}

impl Default for RelayEndpoint {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:3001".to_string()
}

/// Timing of the agent loop. Milliseconds unless the name says otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentTuning {
    /// How often the queue is checked for the next item.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Delay between writing the prompt and pressing submit.
    #[serde(default = "default_submit_settle_ms")]
    pub submit_settle_ms: u64,

    /// How long the guard is held after a response is reported.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Deadline for the completion signal before a timed-out response is sent.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// How often the surface is scanned for the session-ended indicator.
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,

    /// Full reload of the surface. 0 disables it.
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,

    /// Submit attempts on a surface that is not ready before the item is failed.
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,

    /// First delay before reconnecting to the dispatcher.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect backoff.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            submit_settle_ms: default_submit_settle_ms(),
            cooldown_ms: default_cooldown_ms(),
            completion_timeout_secs: default_completion_timeout_secs(),
            liveness_interval_ms: default_liveness_interval_ms(),
            reload_interval_secs: default_reload_interval_secs(),
            max_submit_attempts: default_max_submit_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_submit_settle_ms() -> u64 {
    300
}

fn default_cooldown_ms() -> u64 {
    100
}

fn default_completion_timeout_secs() -> u64 {
    120
}

fn default_liveness_interval_ms() -> u64 {
    500
}

fn default_reload_interval_secs() -> u64 {
    30 * 60
}

fn default_max_submit_attempts() -> u32 {
    20
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

/// What the agent looks for on the automation surface.
#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    /// Text that marks an ended session.
    #[serde(default = "default_session_expired_marker")]
    pub session_expired_marker: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            session_expired_marker: default_session_expired_marker(),
        }
    }
}

fn default_session_expired_marker() -> String {
    DEFAULT_SESSION_EXPIRED_MARKER.to_string()
}

/// Pacing of the simulated chat page.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Delay before the simulated reply starts.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,

    /// Delay between streamed chunks of the reply.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: default_reply_delay_ms(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

fn default_reply_delay_ms() -> u64 {
    400
}

fn default_chunk_delay_ms() -> u64 {
    40
}

/// Resolved agent loop timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub tick_interval: Duration,
    pub submit_settle: Duration,
    pub cooldown: Duration,
    pub completion_timeout: Duration,
    pub liveness_interval: Duration,
    pub reload_interval: Option<Duration>,
    pub max_submit_attempts: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentTuning::default().settings()
    }
}

impl AgentTuning {
    pub fn settings(&self) -> AgentSettings {
        AgentSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            submit_settle: Duration::from_millis(self.submit_settle_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            completion_timeout: Duration::from_secs(self.completion_timeout_secs),
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            reload_interval: (self.reload_interval_secs > 0)
                .then(|| Duration::from_secs(self.reload_interval_secs)),
            max_submit_attempts: self.max_submit_attempts,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(self.reconnect_delay_ms),
            max: Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    /// Delay to use after `current` failed.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Config {
    /// Load configuration from the specified path or default location.
    ///
    /// Default location: `~/.config/coven/relay-agent.toml`. A missing file at
    /// the default location means "use defaults"; a missing explicit path is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => {
                let default = dirs::config_dir()
                    .map(|d| d.join("coven").join("relay-agent.toml"))
                    .ok_or_else(|| AgentError::Config("Could not determine config path".into()))?;
                if !default.exists() {
                    info!(path = ?default, "No config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            AgentError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration text, expanding `${VAR}` references first.
    pub fn parse(contents: &str) -> Result<Self> {
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: Config = toml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Point the agent at another dispatcher.
    pub fn set_relay_url(&mut self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        validate_url(&url)?;
        self.relay.url = url;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.relay.url)?;

        let agent = &self.agent;
        for (name, value) in [
            ("agent.tick_interval_ms", agent.tick_interval_ms),
            ("agent.liveness_interval_ms", agent.liveness_interval_ms),
            ("agent.completion_timeout_secs", agent.completion_timeout_secs),
            ("agent.reconnect_delay_ms", agent.reconnect_delay_ms),
        ] {
            if value == 0 {
                return Err(AgentError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if agent.max_submit_attempts == 0 {
            return Err(AgentError::Config(
                "agent.max_submit_attempts must be greater than 0".into(),
            ));
        }
        if agent.reconnect_max_delay_ms < agent.reconnect_delay_ms {
            return Err(AgentError::Config(
                "agent.reconnect_max_delay_ms must not be below agent.reconnect_delay_ms".into(),
            ));
        }
        if self.surface.session_expired_marker.trim().is_empty() {
            return Err(AgentError::Config(
                "surface.session_expired_marker must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(AgentError::Config(format!(
            "relay.url '{}' must start with ws:// or wss://",
            url
        )))
    }
}
