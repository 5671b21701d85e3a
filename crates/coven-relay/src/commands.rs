// ABOUTME: Handles /relay slash commands.
// ABOUTME: Supports status and help.

use crate::dispatcher::Dispatcher;

/// Parsed command from /relay slash command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show agent connection and session state: /relay status
    Status,
    /// Show help message: /relay help or /relay
    Help,
    /// Unknown command with the unrecognized text.
    Unknown(String),
}

impl Command {
    /// Parse slash command text (after "/relay" has been stripped).
    pub fn parse(text: &str) -> Command {
        let text = text.trim();
        match text.split_whitespace().next() {
            None | Some("help") => Command::Help,
            Some("status") => Command::Status,
            Some(other) => Command::Unknown(other.to_string()),
        }
    }
}

/// Execute a command and return the response text.
pub async fn execute_command(command: Command, dispatcher: &Dispatcher) -> String {
    match command {
        Command::Status => {
            let status = dispatcher.status().await;
            let agents = match status.connected_agents {
                0 => ":red_circle: No agent connected".to_string(),
                1 => ":large_green_circle: 1 agent connected".to_string(),
                n => format!(":large_yellow_circle: {} agents connected (prompts are broadcast)", n),
            };
            let session = if status.session_expired {
                ":warning: Session expired; waiting for the agent to reconnect"
            } else {
                ":white_check_mark: Session live"
            };
            format!("*Relay status*\n{}\n{}", agents, session)
        }

        Command::Help => r#":book: *Relay Commands:*

• `/relay status` - Show whether the agent is connected and its session is live
• `/relay help` - Show this help message

_Messages in relayed channels are answered in a thread, one at a time, in order._"#
            .to_string(),

        Command::Unknown(cmd) => format!(
            ":question: Unknown command: `{}`\nUse `/relay help` for available commands.",
            cmd
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::sink::{OutputSink, StatusNotice};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullSink;

    #[async_trait]
    impl OutputSink for NullSink {
        async fn post_result(&self, _: &str, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }

        async fn post_status(&self, _: StatusNotice) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(""), Command::Help);
        assert_eq!(Command::parse("  help "), Command::Help);
        assert_eq!(Command::parse("status"), Command::Status);
        assert_eq!(Command::parse("status now"), Command::Status);
        assert_eq!(Command::parse("bind x"), Command::Unknown("bind".to_string()));
    }

    #[tokio::test]
    async fn test_status_reports_agent_and_session() {
        let dispatcher = Dispatcher::new(Arc::new(NullSink));
        let text = execute_command(Command::Status, &dispatcher).await;
        assert!(text.contains("No agent connected"));
        assert!(text.contains("Session live"));

        let (_id, _rx) = dispatcher.on_connect().await;
        dispatcher.on_session_expired().await;
        let text = execute_command(Command::Status, &dispatcher).await;
        assert!(text.contains("1 agent connected"));
        assert!(text.contains("Session expired"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dispatcher = Dispatcher::new(Arc::new(NullSink));
        let text = execute_command(Command::Unknown("foo".into()), &dispatcher).await;
        assert!(text.contains("`foo`"));
    }
}
