// ABOUTME: Library root for coven-relay.
// ABOUTME: Wires the Slack intake, the dispatcher and the agent WebSocket listener together.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod server;
pub mod sink;
pub mod slack;

pub use config::Config;
pub use dispatcher::{AgentId, Dispatcher, DispatcherStatus};
pub use error::{RelayError, Result};
pub use intake::{Intake, IntakeDecision};
pub use server::RelayServer;
pub use sink::{OutputSink, StatusNotice};
pub use slack::{RelaySlackClient, SlackMessageInfo, SlackSink};

use slack_morphism::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error handler for Socket Mode events.
fn socket_mode_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    error!(error = %err, "Socket Mode error");
    HttpStatusCode::OK
}

/// Run the relay with the given config path.
pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    info!("coven-relay starting");

    let config = Config::load(config_path)?;
    let listen = config.listen_addr()?;
    info!(
        listen = %listen,
        allowed_channels = config.relay.allowed_channels.len(),
        "Configuration loaded"
    );

    let slack = Arc::new(RelaySlackClient::new(&config.slack).await?);
    let sink = Arc::new(SlackSink::new(
        Arc::clone(&slack),
        config.relay.status_channel.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(sink));
    let intake = Arc::new(Intake::new(
        config.clone(),
        Arc::clone(&slack),
        Arc::clone(&dispatcher),
    ));

    let cancel = CancellationToken::new();
    let server = RelayServer::bind(listen, Arc::clone(&dispatcher)).await?;
    let server_task = tokio::spawn(server.serve(cancel.child_token()));

    let client = Arc::new(slack_morphism::SlackClient::new(
        SlackClientHyperConnector::new()?,
    ));

    let listener_environment = Arc::new(
        SlackClientEventsListenerEnvironment::new(client.clone())
            .with_error_handler(socket_mode_error_handler)
            .with_user_state(intake.clone()),
    );

    let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new()
        .with_push_events(handle_push_event)
        .with_command_events(handle_slash_command);

    let socket_mode_listener = SlackClientSocketModeListener::new(
        &SlackClientSocketModeConfig::new(),
        listener_environment.clone(),
        socket_mode_callbacks,
    );

    let app_token_value: SlackApiTokenValue = config.slack.app_token.clone().into();
    let app_token = SlackApiToken::new(app_token_value);

    info!("Starting Socket Mode listener");
    socket_mode_listener.listen_for(&app_token).await?;

    tokio::select! {
        _ = socket_mode_listener.serve() => {
            info!("Socket Mode listener stopped");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    cancel.cancel();
    match server_task.await {
        Ok(Err(e)) => error!(error = %e, "Relay listener failed"),
        Err(e) => error!(error = %e, "Relay listener task panicked"),
        Ok(Ok(())) => {}
    }

    info!("coven-relay stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Handle push events (channel messages).
async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state_guard = states.read().await;
    let intake: &Arc<Intake> = state_guard
        .get_user_state::<Arc<Intake>>()
        .ok_or("Missing intake state")?;
    let intake = Arc::clone(intake);
    drop(state_guard);

    if let SlackEventCallbackBody::Message(msg_event) = event.event {
        if let Some(msg_info) = SlackMessageInfo::from_message_event(&msg_event) {
            tokio::spawn(async move {
                if let Err(e) = intake.handle_message(msg_info).await {
                    error!(error = %e, "Failed to handle message");
                }
            });
        }
    }

    Ok(())
}

/// Handle /relay slash command events.
async fn handle_slash_command(
    event: SlackCommandEvent,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> std::result::Result<SlackCommandEventResponse, Box<dyn std::error::Error + Send + Sync>> {
    let state_guard = states.read().await;
    let intake: &Arc<Intake> = state_guard
        .get_user_state::<Arc<Intake>>()
        .ok_or("Missing intake state")?;
    let intake = Arc::clone(intake);
    drop(state_guard);

    if event.command.0 != "/relay" {
        return Ok(SlackCommandEventResponse::new(
            SlackMessageContent::new().with_text("Unknown command".to_string()),
        ));
    }

    let command_text = event.text.clone().unwrap_or_default();
    info!(
        channel_id = %event.channel_id,
        user_id = %event.user_id,
        command_text = %command_text,
        "Processing /relay slash command"
    );

    let command = commands::Command::parse(&command_text);
    let response_text = commands::execute_command(command, intake.dispatcher()).await;

    Ok(SlackCommandEventResponse::new(
        SlackMessageContent::new().with_text(response_text),
    ))
}
