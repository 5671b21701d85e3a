// ABOUTME: Integration tests for coven-relay-agent.
// ABOUTME: Config loading plus the full path: dispatcher -> WebSocket -> agent -> chat page and back.

use async_trait::async_trait;
use coven_relay::{Dispatcher, OutputSink, RelayServer, StatusNotice};
use coven_relay_agent::simulator::echo_reply;
use coven_relay_agent::{AgentError, ChatPage, Config, ReplyMode, Responder, Surface};
use coven_relay_proto::Payload;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
fn test_config_loading_full() {
    let config_content = r#"
[relay]
url = "ws://10.0.0.5:3001"

[agent]
tick_interval_ms = 250
completion_timeout_secs = 90
reload_interval_secs = 600
max_submit_attempts = 5

[surface]
session_expired_marker = "Please log in again"
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config_content.as_bytes()).unwrap();

    let config = Config::load(Some(file.path().to_path_buf())).unwrap();
    let settings = config.agent.settings();

    assert_eq!(config.relay.url, "ws://10.0.0.5:3001");
    assert_eq!(settings.tick_interval, Duration::from_millis(250));
    assert_eq!(settings.completion_timeout, Duration::from_secs(90));
    assert_eq!(settings.reload_interval, Some(Duration::from_secs(600)));
    assert_eq!(settings.max_submit_attempts, 5);
    assert_eq!(settings.submit_settle, Duration::from_millis(300));
    assert_eq!(config.surface.session_expired_marker, "Please log in again");
}

#[test]
fn test_config_empty_file_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.relay.url, "ws://127.0.0.1:3001");
    assert_eq!(
        config.surface.session_expired_marker,
        "Your session has expired"
    );
}

#[test]
fn test_config_expands_env_vars() {
    std::env::set_var("COVEN_RELAY_AGENT_TEST_URL", "wss://relay.internal:443");
    let config = Config::parse(
        r#"
[relay]
url = "${COVEN_RELAY_AGENT_TEST_URL}"
"#,
    )
    .unwrap();
    assert_eq!(config.relay.url, "wss://relay.internal:443");
}

#[test]
fn test_config_rejects_non_websocket_url() {
    let result = Config::parse(
        r#"
[relay]
url = "http://127.0.0.1:3001"
"#,
    );
    assert!(result.unwrap_err().to_string().contains("ws://"));
}

#[test]
fn test_config_missing_explicit_file() {
    let result = Config::load(Some("/nonexistent/relay-agent.toml".into()));
    assert!(matches!(result, Err(AgentError::Config(_))));
}

// ============================================================================
// End to end through the dispatcher
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Posted {
    Result { thread_ts: Option<String>, text: String },
    Status(StatusNotice),
    Deleted(String),
}

#[derive(Default)]
struct RecordingSink {
    posted: Mutex<Vec<Posted>>,
}

impl RecordingSink {
    fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }

    fn results(&self) -> Vec<(Option<String>, String)> {
        self.posted()
            .into_iter()
            .filter_map(|p| match p {
                Posted::Result { thread_ts, text } => Some((thread_ts, text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn post_result(
        &self,
        _channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> coven_relay::Result<()> {
        self.posted.lock().unwrap().push(Posted::Result {
            thread_ts: thread_ts.map(|s| s.to_string()),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn post_status(&self, notice: StatusNotice) -> coven_relay::Result<()> {
        self.posted.lock().unwrap().push(Posted::Status(notice));
        Ok(())
    }

    async fn delete_message(&self, _channel: &str, ts: &str) -> coven_relay::Result<()> {
        self.posted.lock().unwrap().push(Posted::Deleted(ts.to_string()));
        Ok(())
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 10s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Stack {
    sink: Arc<RecordingSink>,
    dispatcher: Arc<Dispatcher>,
    page: ChatPage,
    cancel: CancellationToken,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_stack(mode: ReplyMode) -> Stack {
    start_stack_reloading(mode, 0).await
}

async fn start_stack_reloading(mode: ReplyMode, reload_interval_secs: u64) -> Stack {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Arc::new(Dispatcher::new(sink.clone()));
    let server = RelayServer::bind("127.0.0.1:0".parse().unwrap(), dispatcher.clone())
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let cancel = CancellationToken::new();
    tokio::spawn(server.serve(cancel.child_token()));

    let config = Config::parse(&format!(
        r#"
[relay]
url = "{}"

[agent]
tick_interval_ms = 10
submit_settle_ms = 5
cooldown_ms = 5
completion_timeout_secs = 5
liveness_interval_ms = 10
reload_interval_secs = {}
reconnect_delay_ms = 20
reconnect_max_delay_ms = 100
"#,
        url, reload_interval_secs
    ))
    .unwrap();

    let page = ChatPage::new(&config.surface.session_expired_marker).unwrap();
    Responder::new(page.clone(), mode)
        .with_delays(Duration::from_millis(5), Duration::from_millis(1))
        .spawn(cancel.child_token());

    let surface: Arc<dyn Surface> = Arc::new(page.clone());
    let agent_cancel = cancel.child_token();
    tokio::spawn(async move {
        coven_relay_agent::run_with_surface(&config, surface, agent_cancel)
            .await
            .unwrap();
    });

    let probe = sink.clone();
    wait_until(|| {
        probe
            .posted()
            .contains(&Posted::Status(StatusNotice::AgentConnected))
    })
    .await;

    Stack {
        sink,
        dispatcher,
        page,
        cancel,
    }
}

#[tokio::test]
async fn test_prompts_answered_in_order_in_their_threads() {
    let stack = start_stack(ReplyMode::Echo).await;

    let prompts = [
        Payload::new("2+2?", "1700000000.000100", "C04EXK6T85U")
            .with_pending_ts("1700000000.000101"),
        Payload::new("capital of France?", "1700000000.000200", "C04EXK6T85U")
            .with_thread_ts("1700000000.000001")
            .with_pending_ts("1700000000.000201"),
    ];
    for prompt in prompts {
        stack.dispatcher.send_prompt(prompt).await.unwrap();
    }

    let sink = stack.sink.clone();
    wait_until(|| sink.results().len() == 2).await;

    assert_eq!(
        stack.sink.results(),
        vec![
            (Some("1700000000.000100".to_string()), echo_reply("2+2?")),
            (
                Some("1700000000.000001".to_string()),
                echo_reply("capital of France?")
            ),
        ]
    );

    let sink = stack.sink.clone();
    wait_until(|| {
        sink.posted()
            .contains(&Posted::Deleted("1700000000.000201".into()))
    })
    .await;
    assert!(stack
        .sink
        .posted()
        .contains(&Posted::Deleted("1700000000.000101".into())));
}

#[tokio::test]
async fn test_session_expiry_reaches_dispatcher_once() {
    let stack = start_stack(ReplyMode::Echo).await;
    stack.page.show_session_expired().await.unwrap();

    let dispatcher = stack.dispatcher.clone();
    wait_until(|| dispatcher.is_session_expired()).await;

    // Several liveness scans later there is still one notice.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let notices = stack
        .sink
        .posted()
        .into_iter()
        .filter(|p| *p == Posted::Status(StatusNotice::SessionExpired))
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn test_stalled_reply_comes_back_as_timeout() {
    let stack = start_stack(ReplyMode::Stall).await;
    stack
        .dispatcher
        .send_prompt(Payload::new("2+2?", "1.1", "C1"))
        .await
        .unwrap();

    let sink = stack.sink.clone();
    wait_until(|| !sink.results().is_empty()).await;

    let (thread_ts, text) = stack.sink.results().remove(0);
    assert_eq!(thread_ts.as_deref(), Some("1.1"));
    assert!(text.starts_with(":hourglass:"), "got {}", text);
}

#[tokio::test]
async fn test_reload_clears_expiry_on_dispatcher() {
    let stack = start_stack_reloading(ReplyMode::Echo, 1).await;
    stack.page.show_session_expired().await.unwrap();

    let dispatcher = stack.dispatcher.clone();
    wait_until(|| dispatcher.is_session_expired()).await;

    // The reload reconnects, and the new connection re-arms the dispatcher.
    let sink = stack.sink.clone();
    wait_until(|| {
        sink.posted()
            .iter()
            .filter(|p| **p == Posted::Status(StatusNotice::AgentConnected))
            .count()
            >= 2
    })
    .await;
    let dispatcher = stack.dispatcher.clone();
    wait_until(|| !dispatcher.is_session_expired()).await;
    assert!(stack.page.reload_count().await >= 1);

    // Prompts get through again.
    stack
        .dispatcher
        .send_prompt(Payload::new("2+2?", "3.1", "C1"))
        .await
        .unwrap();
    let sink = stack.sink.clone();
    wait_until(|| !sink.results().is_empty()).await;
    assert_eq!(
        stack.sink.results(),
        vec![(Some("3.1".to_string()), echo_reply("2+2?"))]
    );
}
