// ABOUTME: Configuration loading and validation for the relay dispatcher.
// ABOUTME: Supports TOML config files with environment variable expansion.

use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

/// Top-level configuration structure for coven-relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub slack: SlackConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Slack API credentials for Socket Mode connection.
#[derive(Clone, Deserialize)]
pub struct SlackConfig {
    /// App-level token (xapp-...) for Socket Mode WebSocket connection.
    pub app_token: String,
    /// Bot token (xoxb-...) for posting and deleting messages.
    pub bot_token: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("app_token", &"[REDACTED]")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

/// Relay behavior configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Address the agent WebSocket listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Channels whose messages are relayed (empty = all channels the bot is in).
    #[serde(default)]
    pub allowed_channels: Vec<String>,

    /// Channel that receives agent connected/disconnected/expired notices.
    /// Notices are only logged when unset.
    #[serde(default)]
    pub status_channel: Option<String>,

    /// Placeholder posted in the thread while the agent works.
    /// `{user}` is replaced with a mention of the requester.
    #[serde(default = "default_pending_text")]
    pub pending_text: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allowed_channels: Vec::new(),
            status_channel: None,
            pending_text: default_pending_text(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_pending_text() -> String {
    "{user} working on it... hang tight!".to_string()
}

impl Config {
    /// Load configuration from the specified path or default location.
    ///
    /// Default location: `~/.config/coven/relay.toml`
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| dirs::config_dir().map(|d| d.join("coven").join("relay.toml")))
            .ok_or_else(|| RelayError::Config("Could not determine config path".into()))?;

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            RelayError::Config(format!("Failed to read config from {:?}: {}", path, e))
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
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.slack.app_token.is_empty() {
            return Err(RelayError::Config("slack.app_token is required".into()));
        }
        if !self.slack.app_token.starts_with("xapp-") {
            return Err(RelayError::Config(
                "slack.app_token must start with 'xapp-' (app-level token)".into(),
            ));
        }
        if self.slack.bot_token.is_empty() {
            return Err(RelayError::Config("slack.bot_token is required".into()));
        }
        if !self.slack.bot_token.starts_with("xoxb-") {
            return Err(RelayError::Config(
                "slack.bot_token must start with 'xoxb-' (bot token)".into(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// The parsed listener address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.relay.listen.parse().map_err(|e| {
            RelayError::Config(format!(
                "relay.listen '{}' is not a socket address: {}",
                self.relay.listen, e
            ))
        })
    }

    /// Check if a channel is in the allowed list.
    /// Returns true if allowed_channels is empty (allow all) or channel is in list.
    pub fn is_channel_allowed(&self, channel_id: &str) -> bool {
        self.relay.allowed_channels.is_empty()
            || self.relay.allowed_channels.iter().any(|c| c == channel_id)
    }

    /// Render the placeholder text for a requesting user.
    ///
    /// Bot ids (`B...`) cannot be mentioned, so they are shown as is.
    pub fn pending_text_for(&self, user_id: &str) -> String {
        let who = if user_id.starts_with('B') {
            user_id.to_string()
        } else {
            format!("<@{}>", user_id)
        };
        self.relay.pending_text.replace("{user}", &who)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.listen, "127.0.0.1:3001");
        assert!(config.allowed_channels.is_empty());
        assert!(config.status_channel.is_none());
        assert!(config.pending_text.contains("{user}"));
    }

    #[test]
    fn test_slack_config_debug_redacts() {
        let slack = SlackConfig {
            app_token: "xapp-secret".to_string(),
            bot_token: "xoxb-secret".to_string(),
        };
        let rendered = format!("{:?}", slack);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_pending_text_for() {
        let config = Config::parse(
            r#"
[slack]
app_token = "xapp-1"
bot_token = "xoxb-1"
"#,
        )
        .unwrap();
        assert_eq!(
            config.pending_text_for("U42"),
            "<@U42> working on it... hang tight!"
        );
        assert_eq!(
            config.pending_text_for("B01"),
            "B01 working on it... hang tight!"
        );
    }
}
