// ABOUTME: Slack client wrapper and the Slack-backed output sink.
// ABOUTME: Posts results and placeholders, deletes placeholders, and parses message events.

use crate::config::SlackConfig;
use crate::error::{RelayError, Result};
use crate::sink::{OutputSink, StatusNotice};
use async_trait::async_trait;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Slack client wrapper holding the bot session credentials.
pub struct RelaySlackClient {
    client: Arc<SlackHyperClient>,
    bot_token: SlackApiToken,
    bot_user_id: SlackUserId,
}

impl RelaySlackClient {
    /// Create a Slack client and authenticate.
    pub async fn new(config: &SlackConfig) -> Result<Self> {
        info!("Initializing Slack client");

        let connector = SlackClientHyperConnector::new()
            .map_err(|e| RelayError::Slack(format!("Failed to create Slack connector: {}", e)))?;
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        let bot_token_value: SlackApiTokenValue = config.bot_token.clone().into();
        let bot_token = SlackApiToken::new(bot_token_value);

        let session = client.open_session(&bot_token);
        let auth_response = session
            .auth_test()
            .await
            .map_err(|e| RelayError::Slack(format!("Auth test failed: {}", e)))?;

        let bot_user_id = auth_response.user_id;
        info!(bot_user_id = %bot_user_id, "Slack authentication successful");

        Ok(Self {
            client,
            bot_token,
            bot_user_id,
        })
    }

    pub fn bot_user_id(&self) -> &SlackUserId {
        &self.bot_user_id
    }

    /// Post a message to a Slack channel, optionally in a thread.
    pub async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<SlackTs> {
        debug!(channel_id = %channel_id, thread_ts = ?thread_ts, "Posting message to Slack");

        let session = self.client.open_session(&self.bot_token);

        let mut request = SlackApiChatPostMessageRequest::new(
            SlackChannelId::new(channel_id.to_string()),
            SlackMessageContent::new().with_text(text.to_string()),
        );

        if let Some(ts) = thread_ts {
            request = request.with_thread_ts(SlackTs::new(ts.to_string()));
        }

        let response = session.chat_post_message(&request).await?;

        debug!(message_ts = %response.ts, "Message posted successfully");
        Ok(response.ts)
    }

    /// Delete a message the bot posted earlier.
    pub async fn delete_message(&self, channel_id: &str, ts: &str) -> Result<()> {
        debug!(channel_id = %channel_id, ts = %ts, "Deleting Slack message");

        let session = self.client.open_session(&self.bot_token);
        let request = SlackApiChatDeleteRequest::new(
            SlackChannelId::new(channel_id.to_string()),
            SlackTs::new(ts.to_string()),
        );
        session.chat_delete(&request).await?;
        Ok(())
    }
}

/// Output sink that posts into Slack threads.
pub struct SlackSink {
    client: Arc<RelaySlackClient>,
    status_channel: Option<String>,
}

impl SlackSink {
    pub fn new(client: Arc<RelaySlackClient>, status_channel: Option<String>) -> Self {
        Self {
            client,
            status_channel,
        }
    }
}

#[async_trait]
impl OutputSink for SlackSink {
    async fn post_result(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<()> {
        self.client.post_message(channel, text, thread_ts).await?;
        Ok(())
    }

    async fn post_status(&self, notice: StatusNotice) -> Result<()> {
        match self.status_channel.as_deref() {
            Some(channel) => {
                self.client
                    .post_message(channel, &notice.to_string(), None)
                    .await?;
            }
            None => info!(notice = %notice, "Relay status"),
        }
        Ok(())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        self.client.delete_message(channel, ts).await
    }
}

/// A Slack message worth relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackMessageInfo {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
}

impl SlackMessageInfo {
    /// Extract message info from a push event.
    ///
    /// Returns None for edits, joins and other subtyped events (bot messages
    /// excepted), and for events with no sender or text.
    pub fn from_message_event(event: &SlackMessageEvent) -> Option<Self> {
        if !matches!(
            event.subtype,
            None | Some(SlackMessageEventType::BotMessage)
        ) {
            return None;
        }

        let channel_id = event.origin.channel.as_ref()?.to_string();
        // Bot messages usually carry only a bot id.
        let user_id = match (&event.sender.user, &event.sender.bot_id) {
            (Some(user), _) => user.to_string(),
            (None, Some(bot)) => bot.to_string(),
            (None, None) => return None,
        };
        let text = event.content.as_ref()?.text.as_ref()?.clone();
        let message_ts = event.origin.ts.to_string();
        let thread_ts = event.origin.thread_ts.as_ref().map(|ts| ts.to_string());

        Some(Self {
            channel_id,
            user_id,
            text,
            message_ts,
            thread_ts,
        })
    }

    /// The thread every reply to this message belongs in.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.message_ts)
    }

    /// True when the message has something to relay.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
