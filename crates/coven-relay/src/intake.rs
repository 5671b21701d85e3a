// ABOUTME: Turns incoming Slack messages into relay prompts.
// ABOUTME: Filters channels, posts the placeholder, and refuses while the session is expired.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{RelayError, Result};
use crate::slack::{RelaySlackClient, SlackMessageInfo};

use coven_relay_proto::Payload;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SESSION_EXPIRED_REPLY: &str =
    ":warning: The relay agent's session has expired. Try again once it reconnects.";
const NO_AGENT_REPLY: &str =
    ":electric_plug: The relay agent is offline, so this message was not queued. Please resend it later.";

/// What to do with an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeDecision {
    /// Not for us; drop silently.
    Ignore(&'static str),
    /// The agent's session is known to be dead; tell the user instead of queueing.
    RefuseExpired,
    /// Queue it.
    Relay,
}

/// Accepts Slack messages and feeds them to the dispatcher.
pub struct Intake {
    config: Config,
    slack: Arc<RelaySlackClient>,
    dispatcher: Arc<Dispatcher>,
}

impl Intake {
    pub fn new(config: Config, slack: Arc<RelaySlackClient>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            slack,
            dispatcher,
        }
    }

    pub fn slack_client(&self) -> &RelaySlackClient {
        &self.slack
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Decide what to do with a message without touching Slack.
    pub fn decide(
        config: &Config,
        msg: &SlackMessageInfo,
        bot_user_id: &str,
        session_expired: bool,
    ) -> IntakeDecision {
        if !config.is_channel_allowed(&msg.channel_id) {
            return IntakeDecision::Ignore("channel not relayed");
        }
        if msg.user_id == bot_user_id {
            return IntakeDecision::Ignore("own message");
        }
        if !msg.has_text() {
            return IntakeDecision::Ignore("empty text");
        }
        if session_expired {
            return IntakeDecision::RefuseExpired;
        }
        IntakeDecision::Relay
    }

    /// Handle an incoming Slack message event.
    pub async fn handle_message(&self, msg: SlackMessageInfo) -> Result<()> {
        let bot_user_id = self.slack.bot_user_id().to_string();
        let decision = Self::decide(
            &self.config,
            &msg,
            &bot_user_id,
            self.dispatcher.is_session_expired(),
        );

        match decision {
            IntakeDecision::Ignore(reason) => {
                debug!(channel_id = %msg.channel_id, reason, "Ignoring message");
                Ok(())
            }
            IntakeDecision::RefuseExpired => {
                info!(channel_id = %msg.channel_id, "Session expired, refusing message");
                self.slack
                    .post_message(
                        &msg.channel_id,
                        SESSION_EXPIRED_REPLY,
                        Some(msg.reply_thread_ts()),
                    )
                    .await?;
                Ok(())
            }
            IntakeDecision::Relay => self.relay(msg).await,
        }
    }

    async fn relay(&self, msg: SlackMessageInfo) -> Result<()> {
        info!(
            channel_id = %msg.channel_id,
            user_id = %msg.user_id,
            ts = %msg.message_ts,
            "Relaying message"
        );

        let pending_text = self.config.pending_text_for(&msg.user_id);
        let pending_ts = match self
            .slack
            .post_message(&msg.channel_id, &pending_text, Some(msg.reply_thread_ts()))
            .await
        {
            Ok(ts) => Some(ts.to_string()),
            Err(e) => {
                // Still relay; the answer matters more than the placeholder.
                warn!(error = %e, "Failed to post placeholder");
                None
            }
        };

        let mut payload = Payload::new(msg.text.trim(), &msg.message_ts, &msg.channel_id);
        payload.thread_ts = msg.thread_ts.clone();
        payload.pending_ts = pending_ts.clone();

        match self.dispatcher.send_prompt(payload).await {
            Ok(_) => Ok(()),
            Err(RelayError::NoAgentConnected) => {
                if let Some(ts) = pending_ts.as_deref() {
                    if let Err(e) = self.slack.delete_message(&msg.channel_id, ts).await {
                        warn!(error = %e, "Failed to remove placeholder");
                    }
                }
                self.slack
                    .post_message(
                        &msg.channel_id,
                        NO_AGENT_REPLY,
                        Some(msg.reply_thread_ts()),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to relay message");
                Err(e)
            }
        }
    }
}
