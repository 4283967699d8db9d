//! Artifact lifecycle
//!
//! Each renderable block owns an [`ArtifactSlot`]. The slot holds at most one
//! [`Artifact`], and an artifact holds at most one [`ResourceHandle`]. Any
//! handle being displaced or dropped is released through the store.

use crate::classify::Classification;
use crate::resources::{ResourceHandle, ResourceStore};
use crate::trust::TrustedMarkup;
use chatrender_mermaid_fix::Fix;

pub const LABEL_RENDERING: &str = "⏳ Rendering...";
pub const LABEL_CLOSE: &str = "❌ Close Preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DocumentPreview,
    DiagramPreview,
}

impl ArtifactKind {
    pub fn for_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::Document => Some(ArtifactKind::DocumentPreview),
            Classification::Diagram => Some(ArtifactKind::DiagramPreview),
            Classification::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::DocumentPreview => "document-preview",
            ArtifactKind::DiagramPreview => "diagram-preview",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Idle,
    Rendering,
    Ready,
    Error,
}

impl ArtifactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactState::Idle => "idle",
            ArtifactState::Rendering => "rendering",
            ArtifactState::Ready => "ready",
            ArtifactState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Badge {
    Success,
    Warning { detail: String },
}

impl Badge {
    pub fn warning_for(fixes: &[Fix]) -> Self {
        let lines: Vec<String> = fixes.iter().map(ToString::to_string).collect();
        Badge::Warning {
            detail: format!("Applied fixes:\n{}", lines.join("\n")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Badge::Success => "✓ Rendered",
            Badge::Warning { .. } => "⚠️ Auto-fixed",
        }
    }
}

/// Primary content area of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Pending,
    /// Embedded live document, shown through its resource URL
    Document { url: String },
    Markup(TrustedMarkup),
    ErrorText(String),
    ErrorMarkup(TrustedMarkup),
}

#[derive(Debug)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub state: ArtifactState,
    pub status: String,
    pub content: ArtifactContent,
    pub badges: Vec<Badge>,
    pub fixes: Vec<Fix>,
    handle: Option<ResourceHandle>,
}

/// Snapshot of an artifact handed to the display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactView {
    pub kind: ArtifactKind,
    pub state: ArtifactState,
    pub status: String,
    pub content: ArtifactContent,
    pub badges: Vec<Badge>,
    pub can_open_externally: bool,
}

impl Artifact {
    pub fn rendering(kind: ArtifactKind, status: impl Into<String>) -> Self {
        Self {
            kind,
            state: ArtifactState::Rendering,
            status: status.into(),
            content: ArtifactContent::Pending,
            badges: Vec::new(),
            fixes: Vec::new(),
            handle: None,
        }
    }

    pub fn view(&self) -> ArtifactView {
        ArtifactView {
            kind: self.kind,
            state: self.state,
            status: self.status.clone(),
            content: self.content.clone(),
            badges: self.badges.clone(),
            can_open_externally: self.state == ArtifactState::Ready && self.handle.is_some(),
        }
    }

    pub fn handle_url(&self) -> Option<&str> {
        self.handle.as_ref().map(ResourceHandle::url)
    }

    /// Take ownership of `handle`, releasing whatever was held before
    pub fn attach_handle(&mut self, store: &ResourceStore, handle: ResourceHandle) {
        if let Some(previous) = self.handle.replace(handle) {
            store.revoke(previous);
        }
    }

    /// Release the held handle, if any. Returns whether one was released.
    pub fn release(&mut self, store: &ResourceStore) -> bool {
        match self.handle.take() {
            Some(handle) => store.revoke(handle),
            None => false,
        }
    }
}

/// What a trigger activation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Render,
    Close,
    Ignored,
}

/// The artifact position next to one source block
#[derive(Debug)]
pub struct ArtifactSlot {
    kind: ArtifactKind,
    idle_label: &'static str,
    artifact: Option<Artifact>,
}

impl ArtifactSlot {
    pub fn new(kind: ArtifactKind, idle_label: &'static str) -> Self {
        Self {
            kind,
            idle_label,
            artifact: None,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn state(&self) -> ArtifactState {
        self.artifact
            .as_ref()
            .map_or(ArtifactState::Idle, |artifact| artifact.state)
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn artifact_mut(&mut self) -> Option<&mut Artifact> {
        self.artifact.as_mut()
    }

    pub fn trigger_label(&self) -> &'static str {
        match self.state() {
            ArtifactState::Idle => self.idle_label,
            ArtifactState::Rendering => LABEL_RENDERING,
            ArtifactState::Ready | ArtifactState::Error => LABEL_CLOSE,
        }
    }

    pub fn trigger_disabled(&self) -> bool {
        self.state() == ArtifactState::Rendering
    }

    /// Decide what an activation means in the current state
    pub fn toggle(&self) -> Toggle {
        match self.state() {
            ArtifactState::Idle => Toggle::Render,
            ArtifactState::Rendering => Toggle::Ignored,
            ArtifactState::Ready | ArtifactState::Error => Toggle::Close,
        }
    }

    /// Put a fresh artifact in `rendering`, releasing any previous one
    pub fn begin(&mut self, store: &ResourceStore, status: impl Into<String>) -> &mut Artifact {
        self.close(store);
        self.artifact.insert(Artifact::rendering(self.kind, status))
    }

    /// Remove the artifact and release its handle; the slot returns to idle
    pub fn close(&mut self, store: &ResourceStore) -> bool {
        match self.artifact.take() {
            Some(mut artifact) => {
                artifact.release(store);
                true
            }
            None => false,
        }
    }
}
