// ABOUTME: Library root for coven-relay-agent.
// ABOUTME: Wires the relay connection, the single-flight agent loop and an automation surface together.

pub mod agent;
pub mod completion;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod page;
pub mod queue;
pub mod simulator;
pub mod surface;

pub use agent::{Agent, AgentInput};
pub use config::{AgentSettings, Config, ReconnectPolicy};
pub use connection::{reconnect_channel, ReconnectHandle};
pub use error::{AgentError, Result, SurfaceError};
pub use page::ChatPage;
pub use queue::{QueuedItem, WorkQueue};
pub use simulator::{ReplyMode, Responder};
pub use surface::{ChangeStream, ContainerProbe, NodeId, StructureChange, Surface};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Buffer for prompts and connection events headed into the agent loop.
const INPUT_BUFFER: usize = 100;
/// Buffer for messages headed to the dispatcher.
const OUTBOUND_BUFFER: usize = 100;

/// Run the agent against `surface` until `cancel` fires.
pub async fn run_with_surface(
    config: &Config,
    surface: Arc<dyn Surface>,
    cancel: CancellationToken,
) -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (reconnect, reconnect_rx) = connection::reconnect_channel();

    let connection = tokio::spawn(connection::run_connection(
        config.relay.url.clone(),
        config.agent.reconnect_policy(),
        input_tx,
        outbound_rx,
        reconnect_rx,
        cancel.child_token(),
    ));

    Agent::new(surface, config.agent.settings())
        .with_reconnect(reconnect)
        .run(input_rx, outbound_tx, cancel.clone())
        .await;

    cancel.cancel();
    match connection.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Relay connection ended with error"),
        Err(e) => error!(error = %e, "Relay connection task panicked"),
    }
    Ok(())
}

/// Run the agent against the in-memory chat page with a scripted responder.
pub async fn run_simulated(config: &Config, cancel: CancellationToken) -> Result<()> {
    let page = ChatPage::new(&config.surface.session_expired_marker)?;
    let responder = Responder::new(page.clone(), ReplyMode::Echo).with_delays(
        Duration::from_millis(config.simulator.reply_delay_ms),
        Duration::from_millis(config.simulator.chunk_delay_ms),
    );
    let responder_task = responder.spawn(cancel.child_token());

    info!(url = %config.relay.url, "Starting agent against simulated chat page");
    let result = run_with_surface(config, Arc::new(page), cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = responder_task.await {
        error!(error = %e, "Simulator task panicked");
    }
    result
}
