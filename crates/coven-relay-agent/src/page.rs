// ABOUTME: In-memory chat page implementing Surface on top of Document.
// ABOUTME: Mirrors the chat UI's structure: input with task id, turn list, modal portal.

use crate::document::Document;
use crate::error::SurfaceError;
use crate::surface::{ChangeStream, ContainerProbe, NodeId, StructureChange, Surface};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

const CHANGE_BUFFER: usize = 256;
const SUBMISSION_BUFFER: usize = 64;

/// A prompt the page accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub task_id: String,
    pub prompt: String,
}

/// Nodes of one assistant turn, handed out by `begin_reply`.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    pub task_id: String,
    turn: NodeId,
    container: NodeId,
    controls: NodeId,
}

struct Layout {
    input: NodeId,
    thread: NodeId,
    portal: NodeId,
}

struct PageState {
    doc: Document,
    layout: Layout,
    input_value: String,
    ready: bool,
    prompts: Vec<String>,
    reloads: usize,
}

impl PageState {
    fn fresh() -> Result<Self, SurfaceError> {
        let mut doc = Document::new();
        let body = doc.root();

        let main = doc.append_element(body, "main")?;
        let form = doc.append_element(main, "form")?;
        let input = doc.append_element(form, "textarea")?;
        doc.set_attr(input, "data-id", &new_task_id())?;
        let submit = doc.append_element(form, "button")?;
        doc.set_attr(submit, "type", "submit")?;

        let thread = doc.append_element(main, "div")?;
        doc.set_attr(thread, "class", "react-scroll-to-bottom--css")?;

        let portal = doc.append_element(body, "div")?;
        doc.set_attr(portal, "data-headlessui-portal", "")?;

        Ok(Self {
            doc,
            layout: Layout {
                input,
                thread,
                portal,
            },
            input_value: String::new(),
            ready: true,
            prompts: Vec::new(),
            reloads: 0,
        })
    }

    fn task_id(&self) -> Result<String, SurfaceError> {
        self.doc
            .attr(self.layout.input, "data-id")
            .map(str::to_string)
            .ok_or_else(|| SurfaceError::ElementMissing("textarea[data-id]".into()))
    }

    fn append_classed(
        &mut self,
        parent: NodeId,
        tag: &str,
        class: &str,
    ) -> Result<NodeId, SurfaceError> {
        let id = self.doc.append_element(parent, tag)?;
        self.doc.set_attr(id, "class", class)?;
        Ok(id)
    }

    fn append_button(&mut self, parent: NodeId, label: &str) -> Result<NodeId, SurfaceError> {
        let id = self.doc.append_element(parent, "button")?;
        self.doc.append_text(id, label)?;
        Ok(id)
    }
}

fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Chat page simulation. Cheap to clone; clones share the same page.
///
/// Each submit assigns a fresh task id to the input's `data-id`. Replies
/// live in a turn whose body holds a container classed `{task_id}-reply`.
/// While streaming, the turn shows one stop control; when the reply is done
/// the controls are swapped for two (copy, regenerate).
#[derive(Clone)]
pub struct ChatPage {
    state: Arc<Mutex<PageState>>,
    changes: broadcast::Sender<StructureChange>,
    submissions: broadcast::Sender<Submission>,
    session_expired_marker: Arc<str>,
}

impl ChatPage {
    pub fn new(session_expired_marker: &str) -> Result<Self, SurfaceError> {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (submissions, _) = broadcast::channel(SUBMISSION_BUFFER);
        Ok(Self {
            state: Arc::new(Mutex::new(PageState::fresh()?)),
            changes,
            submissions,
            session_expired_marker: Arc::from(session_expired_marker),
        })
    }

    /// Prompts accepted by `submit`, for whoever plays the remote side.
    pub fn submissions(&self) -> broadcast::Receiver<Submission> {
        self.submissions.subscribe()
    }

    /// Number of live change subscriptions.
    pub fn observer_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Toggle whether the input and submit control are usable.
    pub async fn set_ready(&self, ready: bool) {
        self.state.lock().await.ready = ready;
    }

    /// Every prompt submitted since the last reload.
    pub async fn prompts(&self) -> Vec<String> {
        self.state.lock().await.prompts.clone()
    }

    pub async fn reload_count(&self) -> usize {
        self.state.lock().await.reloads
    }

    /// Put the session-ended dialog into the portal.
    pub async fn show_session_expired(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        let portal = state.layout.portal;
        let dialog = state.doc.append_element(portal, "div")?;
        state.doc.set_attr(dialog, "role", "dialog")?;
        state.doc.append_text(dialog, &self.session_expired_marker)?;
        Ok(())
    }

    /// Start an assistant turn for the current task.
    pub async fn begin_reply(&self) -> Result<ReplyHandle, SurfaceError> {
        let (handle, thread) = {
            let mut state = self.state.lock().await;
            let task_id = state.task_id()?;
            let thread = state.layout.thread;

            let turn = state.append_classed(thread, "div", "turn-assistant")?;
            let body = state.append_classed(turn, "div", "turn-body")?;
            let container =
                state.append_classed(body, "div", &format!("{}-reply markdown", task_id))?;
            let controls = state.append_classed(turn, "div", "turn-controls")?;
            state.append_button(controls, "Stop generating")?;

            (
                ReplyHandle {
                    task_id,
                    turn,
                    container,
                    controls,
                },
                thread,
            )
        };
        self.emit(thread);
        Ok(handle)
    }

    /// Append a chunk of reply text.
    pub async fn stream_text(&self, reply: &ReplyHandle, text: &str) -> Result<(), SurfaceError> {
        self.state
            .lock()
            .await
            .doc
            .append_text(reply.container, text)?;
        self.emit(reply.container);
        Ok(())
    }

    /// End the turn: swap the stop control for the finished-turn controls.
    pub async fn finish_reply(&self, reply: &ReplyHandle) -> Result<(), SurfaceError> {
        {
            let mut state = self.state.lock().await;
            state.doc.clear_children(reply.controls)?;
            state.append_button(reply.controls, "Copy")?;
            state.append_button(reply.controls, "Regenerate")?;
        }
        self.emit(reply.turn);
        Ok(())
    }

    fn emit(&self, target: NodeId) {
        // No observers is fine.
        let _ = self.changes.send(StructureChange { target });
    }
}

#[async_trait]
impl Surface for ChatPage {
    async fn set_input_text(&self, text: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        if !state.ready {
            return Err(SurfaceError::ElementMissing("textarea[data-id]".into()));
        }
        state.input_value = text.to_string();
        Ok(())
    }

    async fn submit(&self) -> Result<(), SurfaceError> {
        let (submission, thread) = {
            let mut state = self.state.lock().await;
            if !state.ready {
                return Err(SurfaceError::ElementMissing("textarea + button".into()));
            }
            if state.input_value.trim().is_empty() {
                return Err(SurfaceError::Driver("input is empty".into()));
            }

            let prompt = std::mem::take(&mut state.input_value);
            let task_id = new_task_id();
            let input = state.layout.input;
            state.doc.set_attr(input, "data-id", &task_id)?;

            let thread = state.layout.thread;
            let turn = state.append_classed(thread, "div", "turn-user")?;
            state.doc.append_text(turn, &prompt)?;
            state.prompts.push(prompt.clone());

            (Submission { task_id, prompt }, thread)
        };

        debug!(task_id = %submission.task_id, "Prompt submitted");
        self.emit(thread);
        let _ = self.submissions.send(submission);
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeStream, SurfaceError> {
        Ok(self.changes.subscribe())
    }

    async fn current_task_id(&self) -> Result<String, SurfaceError> {
        self.state.lock().await.task_id()
    }

    async fn probe(
        &self,
        target: NodeId,
        task_id: &str,
    ) -> Result<Option<ContainerProbe>, SurfaceError> {
        if task_id.is_empty() {
            return Ok(None);
        }
        let state = self.state.lock().await;
        let doc = &state.doc;
        if !doc.contains(target) {
            return Ok(None);
        }
        let Some(container) = doc.find_by_class_prefix(target, task_id) else {
            return Ok(None);
        };

        let enclosing_controls = doc
            .parent(container)
            .and_then(|p| doc.parent(p))
            .map(|grandparent| doc.count_descendants(grandparent, "button"))
            .unwrap_or(0);

        Ok(Some(ContainerProbe {
            content: doc.inner_html(container),
            enclosing_controls,
        }))
    }

    async fn session_ended(&self) -> Result<bool, SurfaceError> {
        let state = self.state.lock().await;
        let doc = &state.doc;
        let marker: &str = &self.session_expired_marker;
        Ok(doc
            .descendants(doc.root())
            .into_iter()
            .filter(|id| doc.attr(*id, "data-headlessui-portal").is_some())
            .any(|portal| doc.text_content(portal).contains(marker)))
    }

    async fn reload(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().await;
        let reloads = state.reloads + 1;
        *state = PageState::fresh()?;
        state.reloads = reloads;
        debug!(reloads, "Page reloaded");
        Ok(())
    }
}
