// ABOUTME: The single-flight agent loop: FIFO intake, one surface interaction at a time.
// ABOUTME: Also runs the liveness scan and the periodic full reload of the surface.

use crate::completion::await_completion;
use crate::config::AgentSettings;
use crate::connection::ReconnectHandle;
use crate::error::SurfaceError;
use crate::queue::{QueuedItem, WorkQueue};
use crate::surface::Surface;

use coven_relay_proto::{Payload, RelayMessage, ResponseStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the connection feeds into the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInput {
    /// A fresh connection to the dispatcher is up.
    Connected,
    /// Enqueue this payload.
    Prompt(Payload),
}

#[derive(Debug)]
enum JobOutcome {
    /// A response went out; carries its status.
    Reported(ResponseStatus),
    /// The surface refused the prompt before submission.
    NotReady {
        item: QueuedItem,
        reason: SurfaceError,
    },
    Cancelled,
}

struct ActiveJob {
    cancel: CancellationToken,
    handle: JoinHandle<JobOutcome>,
}

/// Owns the work queue, the in-flight guard and the expiry latch.
///
/// All three are touched only from `run`, so they need no locking. The
/// in-flight item runs as its own task and reports back through its join
/// handle; the guard stays set until that task has sent the response and
/// waited out the cooldown.
pub struct Agent {
    surface: Arc<dyn Surface>,
    settings: AgentSettings,
    queue: WorkQueue,
    active: Option<ActiveJob>,
    expiry_reported: bool,
    reconnect: Option<ReconnectHandle>,
}

impl Agent {
    pub fn new(surface: Arc<dyn Surface>, settings: AgentSettings) -> Self {
        Self {
            surface,
            settings,
            queue: WorkQueue::new(),
            active: None,
            expiry_reported: false,
            reconnect: None,
        }
    }

    /// Restart the relay connection on every reload, so the dispatcher sees
    /// the reloaded surface as a new session.
    pub fn with_reconnect(mut self, handle: ReconnectHandle) -> Self {
        self.reconnect = Some(handle);
        self
    }

    /// Run until cancelled or until the input side goes away.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<AgentInput>,
        outbound: mpsc::Sender<RelayMessage>,
        cancel: CancellationToken,
    ) {
        let mut ticker = time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = time::interval(self.settings.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reload_every = self.settings.reload_interval;
        let reload_timer = time::sleep(reload_every.unwrap_or(Duration::MAX));
        tokio::pin!(reload_timer);

        info!(
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            reload_secs = reload_every.map(|d| d.as_secs()),
            "Agent loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Agent loop cancelled");
                    break;
                }
                input = inbound.recv() => match input {
                    Some(input) => self.on_input(input),
                    None => {
                        info!("Agent input closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick(&outbound, &cancel),
                _ = liveness.tick() => self.check_liveness(&outbound).await,
                _ = &mut reload_timer, if reload_every.is_some() => {
                    self.reload().await;
                    if let Some(every) = reload_every {
                        reload_timer.as_mut().reset(Instant::now() + every);
                    }
                }
                outcome = poll_job(&mut self.active), if self.active.is_some() => {
                    self.active = None;
                    self.on_job_done(outcome, &outbound).await;
                }
            }
        }

        self.cancel_job();
    }

    fn on_input(&mut self, input: AgentInput) {
        match input {
            AgentInput::Connected => {
                if self.expiry_reported {
                    info!("New connection, session expiry re-armed");
                }
                self.expiry_reported = false;
            }
            AgentInput::Prompt(payload) => {
                debug!(ts = %payload.ts, channel = %payload.channel, "Prompt queued");
                self.queue.enqueue(payload);
                debug!(queued = self.queue.len(), busy = self.queue.is_busy(), "Queue state");
            }
        }
    }

    fn on_tick(&mut self, outbound: &mpsc::Sender<RelayMessage>, cancel: &CancellationToken) {
        let Some(item) = self.queue.try_begin() else {
            return;
        };

        let job_cancel = cancel.child_token();
        let handle = tokio::spawn(process_item(
            Arc::clone(&self.surface),
            self.settings.clone(),
            item,
            outbound.clone(),
            job_cancel.clone(),
        ));
        self.active = Some(ActiveJob {
            cancel: job_cancel,
            handle,
        });
    }

    async fn on_job_done(
        &mut self,
        outcome: Result<JobOutcome, JoinError>,
        outbound: &mpsc::Sender<RelayMessage>,
    ) {
        match outcome {
            Ok(JobOutcome::Reported(status)) => {
                debug!(?status, remaining = self.queue.len(), "Item done");
                self.queue.finish();
            }
            Ok(JobOutcome::NotReady { mut item, reason }) => {
                item.attempts += 1;
                if item.attempts >= self.settings.max_submit_attempts {
                    warn!(
                        ts = %item.payload.ts,
                        attempts = item.attempts,
                        error = %reason,
                        "Surface never became ready, failing item"
                    );
                    let text = format!(
                        "The automation surface was not ready after {} attempts ({})",
                        item.attempts, reason
                    );
                    report(
                        outbound,
                        RelayMessage::failed_response(
                            item.payload.with_text(text),
                            ResponseStatus::Failed,
                        ),
                    )
                    .await;
                    self.queue.finish();
                } else {
                    debug!(
                        ts = %item.payload.ts,
                        attempts = item.attempts,
                        error = %reason,
                        "Surface not ready, will retry"
                    );
                    self.queue.requeue_front(item);
                }
            }
            Ok(JobOutcome::Cancelled) => {
                debug!("Item cancelled");
                self.queue.finish();
            }
            Err(e) => {
                error!(error = %e, "Item task failed");
                self.queue.finish();
            }
        }
    }

    async fn check_liveness(&mut self, outbound: &mpsc::Sender<RelayMessage>) {
        if self.expiry_reported {
            return;
        }
        match self.surface.session_ended().await {
            Ok(true) => {
                warn!("Automation session has ended");
                self.expiry_reported = true;
                report(outbound, RelayMessage::SessionExpired).await;
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Liveness scan failed"),
        }
    }

    /// Drop the in-flight item and everything queued, reset the surface, then
    /// reconnect to the dispatcher.
    async fn reload(&mut self) {
        let in_flight = self.cancel_job();
        let queued = self.queue.clear();
        if in_flight || queued > 0 {
            warn!(in_flight, queued, "Reload is dropping pending prompts");
        }

        info!("Reloading automation surface");
        if let Err(e) = self.surface.reload().await {
            error!(error = %e, "Surface reload failed");
        }
        self.expiry_reported = false;
        if let Some(reconnect) = &self.reconnect {
            reconnect.request();
        }
    }

    /// Returns true if a job was running.
    fn cancel_job(&mut self) -> bool {
        match self.active.take() {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

async fn poll_job(active: &mut Option<ActiveJob>) -> Result<JobOutcome, JoinError> {
    match active {
        Some(job) => (&mut job.handle).await,
        None => std::future::pending().await,
    }
}

async fn report(outbound: &mpsc::Sender<RelayMessage>, msg: RelayMessage) {
    let kind = msg.kind();
    if outbound.send(msg).await.is_err() {
        error!(kind, "Outbound channel closed, message lost");
    }
}

async fn process_item(
    surface: Arc<dyn Surface>,
    settings: AgentSettings,
    item: QueuedItem,
    outbound: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
) -> JobOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => JobOutcome::Cancelled,
        outcome = run_item(surface.as_ref(), &settings, item, &outbound) => outcome,
    }
}

/// SUBMITTING -> AWAITING_COMPLETION -> REPORTED -> cooldown.
async fn run_item(
    surface: &dyn Surface,
    settings: &AgentSettings,
    item: QueuedItem,
    outbound: &mpsc::Sender<RelayMessage>,
) -> JobOutcome {
    debug!(ts = %item.payload.ts, attempt = item.attempts + 1, "Submitting prompt");

    if let Err(reason) = surface.set_input_text(&item.payload.text).await {
        return JobOutcome::NotReady { item, reason };
    }
    let changes = match surface.subscribe().await {
        Ok(changes) => changes,
        Err(reason) => return JobOutcome::NotReady { item, reason },
    };
    time::sleep(settings.submit_settle).await;
    if let Err(reason) = surface.submit().await {
        return JobOutcome::NotReady { item, reason };
    }

    let waited =
        time::timeout(settings.completion_timeout, await_completion(surface, changes)).await;
    let payload = item.payload;
    let (msg, status) = match waited {
        Ok(Ok(text)) => (
            RelayMessage::response(payload.with_text(text)),
            ResponseStatus::Completed,
        ),
        Ok(Err(e)) => {
            warn!(ts = %payload.ts, error = %e, "Surface failed while waiting for completion");
            let text = format!("The automation surface failed: {}", e);
            (
                RelayMessage::failed_response(payload.with_text(text), ResponseStatus::Failed),
                ResponseStatus::Failed,
            )
        }
        Err(_) => {
            let timeout = settings.completion_timeout;
            warn!(ts = %payload.ts, ?timeout, "No completion signal before deadline");
            let text = format!("No response within {:?}", timeout);
            (
                RelayMessage::failed_response(payload.with_text(text), ResponseStatus::TimedOut),
                ResponseStatus::TimedOut,
            )
        }
    };

    info!(ts = %payload.ts, ?status, "Reporting response");
    report(outbound, msg).await;
    time::sleep(settings.cooldown).await;
    JobOutcome::Reported(status)
}
