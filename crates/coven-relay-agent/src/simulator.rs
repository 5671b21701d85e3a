// ABOUTME: Scripted remote side for the in-memory chat page.
// ABOUTME: Answers each submitted prompt by streaming a reply into the page.

use crate::error::SurfaceError;
use crate::page::{ChatPage, Submission};

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the simulated assistant behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Stream an echo of the prompt and finish the turn.
    Echo,
    /// Start streaming but never finish the turn.
    Stall,
}

/// The reply `ReplyMode::Echo` writes for `prompt`.
pub fn echo_reply(prompt: &str) -> String {
    format!("You said: {}", prompt)
}

pub struct Responder {
    page: ChatPage,
    mode: ReplyMode,
    reply_delay: Duration,
    chunk_delay: Duration,
}

impl Responder {
    pub fn new(page: ChatPage, mode: ReplyMode) -> Self {
        Self {
            page,
            mode,
            reply_delay: Duration::from_millis(400),
            chunk_delay: Duration::from_millis(40),
        }
    }

    pub fn with_delays(mut self, reply_delay: Duration, chunk_delay: Duration) -> Self {
        self.reply_delay = reply_delay;
        self.chunk_delay = chunk_delay;
        self
    }

    /// Start answering. Subscribes before returning, so no submission is missed.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let submissions = self.page.submissions();
        tokio::spawn(async move {
            let mut submissions = submissions;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = submissions.recv() => match next {
                        Ok(submission) => {
                            if let Err(e) = self.answer(&submission).await {
                                warn!(task_id = %submission.task_id, error = %e, "Simulated reply failed");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Simulator missed submissions");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn answer(&self, submission: &Submission) -> Result<(), SurfaceError> {
        tokio::time::sleep(self.reply_delay).await;
        let reply = self.page.begin_reply().await?;
        debug!(task_id = %reply.task_id, mode = ?self.mode, "Simulated reply started");

        let text = echo_reply(&submission.prompt);
        for chunk in text.split_inclusive(' ') {
            tokio::time::sleep(self.chunk_delay).await;
            self.page.stream_text(&reply, chunk).await?;
        }

        match self.mode {
            ReplyMode::Echo => self.page.finish_reply(&reply).await,
            ReplyMode::Stall => Ok(()),
        }
    }
}
