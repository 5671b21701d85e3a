// ABOUTME: The automation surface the agent drives: input, submit, structure changes, queries.
// ABOUTME: Implemented by the in-memory chat page; a browser driver would implement the same trait.

use crate::error::SurfaceError;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Handle to a node in the surface's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// One structural change: children were added or removed under `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureChange {
    pub target: NodeId,
}

/// What a structural query found for the current task's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerProbe {
    /// Markup of the container, the extracted result.
    pub content: String,
    /// Actionable controls under the container's grandparent.
    pub enclosing_controls: usize,
}

/// Stream of structure changes. Dropping it unsubscribes.
pub type ChangeStream = broadcast::Receiver<StructureChange>;

#[async_trait]
pub trait Surface: Send + Sync {
    /// Write the prompt into the input field.
    async fn set_input_text(&self, text: &str) -> Result<(), SurfaceError>;

    /// Press submit.
    async fn submit(&self) -> Result<(), SurfaceError>;

    /// Start observing structure changes in the conversation area.
    async fn subscribe(&self) -> Result<ChangeStream, SurfaceError>;

    /// Identifier of the task the surface is currently working on.
    async fn current_task_id(&self) -> Result<String, SurfaceError>;

    /// Look under `target` for the container belonging to `task_id`.
    async fn probe(
        &self,
        target: NodeId,
        task_id: &str,
    ) -> Result<Option<ContainerProbe>, SurfaceError>;

    /// True when the session-ended indicator is showing.
    async fn session_ended(&self) -> Result<bool, SurfaceError>;

    /// Throw away all surface state and start fresh.
    async fn reload(&self) -> Result<(), SurfaceError>;
}
