// ABOUTME: Completion detection: a pure predicate over container probes plus the wait loop.
// ABOUTME: The surface has no "done" event, so completion is inferred from structure changes.

use crate::error::SurfaceError;
use crate::surface::{ChangeStream, ContainerProbe, StructureChange, Surface};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Controls a finished turn exposes around its content (copy and regenerate).
/// A turn still being written shows only the stop control.
pub const COMPLETION_CONTROL_COUNT: usize = 2;

/// True when the probed container sits in a finished turn.
///
/// This is a structural heuristic. It can fire on an unrelated change that
/// happens to leave the same control count, and it stops firing if the
/// surface changes its layout.
pub fn is_completion(probe: &ContainerProbe) -> bool {
    probe.enclosing_controls == COMPLETION_CONTROL_COUNT
}

/// Evaluate one change. The task id is read from the surface now, not when
/// the prompt was submitted.
pub async fn evaluate(
    surface: &dyn Surface,
    change: &StructureChange,
) -> Result<Option<String>, SurfaceError> {
    let task_id = surface.current_task_id().await?;
    let probe = surface.probe(change.target, &task_id).await?;
    Ok(probe.filter(is_completion).map(|p| p.content))
}

/// Consume changes until one is a completion signal and return the result.
///
/// Unbounded on its own; callers wrap it in a deadline. The stream is dropped
/// (unsubscribed) when this future completes or is dropped.
pub async fn await_completion(
    surface: &dyn Surface,
    mut changes: ChangeStream,
) -> Result<String, SurfaceError> {
    loop {
        match changes.recv().await {
            Ok(change) => {
                if let Some(text) = evaluate(surface, &change).await? {
                    return Ok(text);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Structure change stream lagged");
            }
            Err(RecvError::Closed) => return Err(SurfaceError::Detached),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SESSION_EXPIRED_MARKER;
    use crate::page::ChatPage;

    fn probe(controls: usize) -> ContainerProbe {
        ContainerProbe {
            content: "4".to_string(),
            enclosing_controls: controls,
        }
    }

    #[test]
    fn test_predicate_requires_exactly_two_controls() {
        assert!(!is_completion(&probe(0)));
        assert!(!is_completion(&probe(1)));
        assert!(is_completion(&probe(2)));
        assert!(!is_completion(&probe(3)));
    }

    async fn evaluate_all(page: &ChatPage, changes: &mut ChangeStream) -> Vec<Option<String>> {
        let mut results = Vec::new();
        while let Ok(change) = changes.try_recv() {
            results.push(evaluate(page, &change).await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_fires_only_when_turn_finishes() {
        let page = ChatPage::new(DEFAULT_SESSION_EXPIRED_MARKER).unwrap();
        let mut changes = page.subscribe().await.unwrap();

        page.set_input_text("2+2?").await.unwrap();
        page.submit().await.unwrap();
        let reply = page.begin_reply().await.unwrap();
        page.stream_text(&reply, "4").await.unwrap();
        assert!(evaluate_all(&page, &mut changes)
            .await
            .iter()
            .all(Option::is_none));

        page.finish_reply(&reply).await.unwrap();
        assert_eq!(
            evaluate_all(&page, &mut changes).await,
            vec![Some("4".to_string())]
        );
    }

    #[tokio::test]
    async fn test_previous_turn_does_not_match_new_task() {
        let page = ChatPage::new(DEFAULT_SESSION_EXPIRED_MARKER).unwrap();
        let mut changes = page.subscribe().await.unwrap();

        page.set_input_text("first").await.unwrap();
        page.submit().await.unwrap();
        let first = page.begin_reply().await.unwrap();
        page.finish_reply(&first).await.unwrap();

        page.set_input_text("second").await.unwrap();
        page.submit().await.unwrap();
        let _ = evaluate_all(&page, &mut changes).await;

        // Replaying the first turn's completion against the new task id.
        page.finish_reply(&first).await.unwrap();
        assert_eq!(evaluate_all(&page, &mut changes).await, vec![None]);
    }

    #[tokio::test]
    async fn test_await_completion_returns_content() {
        let page = ChatPage::new(DEFAULT_SESSION_EXPIRED_MARKER).unwrap();
        let changes = page.subscribe().await.unwrap();
        page.set_input_text("q").await.unwrap();
        page.submit().await.unwrap();

        let writer = page.clone();
        tokio::spawn(async move {
            let reply = writer.begin_reply().await.unwrap();
            writer.stream_text(&reply, "an ").await.unwrap();
            writer.stream_text(&reply, "answer").await.unwrap();
            writer.finish_reply(&reply).await.unwrap();
        });

        let text = await_completion(&page, changes).await.unwrap();
        assert_eq!(text, "an answer");
        assert_eq!(page.observer_count(), 0);
    }
}
