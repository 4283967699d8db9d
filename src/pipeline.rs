//! Render pipeline controller
//!
//! Drives one block from trigger activation to a finished artifact:
//! classification, then correction and the remote render call for diagrams,
//! or resource assembly for documents. The block table is locked only for
//! synchronous bookkeeping, never across a fetch, and the surface is called
//! after the lock is dropped.

use crate::artifact::{
    ArtifactContent, ArtifactKind, ArtifactSlot, ArtifactState, ArtifactView, Badge, Toggle,
};
use crate::assemble;
use crate::classify::{self, Classification, SourceBlock};
use crate::config::Config;
use crate::diagram::{self, DiagramFailure, DiagramRenderer};
use crate::fetch::FetchAdapter;
use crate::host::NodeId;
use crate::logging;
use crate::opener::TabOpener;
use crate::resources::{ResourceHandle, ResourceStore};
use crate::surface::{Surface, TriggerView};
use crate::trust;
use chatrender_mermaid_fix::Fix;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const STATUS_INITIALIZING: &str = "Initializing...";
pub const STATUS_DOCUMENT_READY: &str = "Render successful! 🎉";
pub const STATUS_DIAGRAM_PENDING: &str = "🎨 Rendering diagram with Kroki.io...";
pub const STATUS_DIAGRAM_READY: &str = "Diagram rendered.";
pub const STATUS_DIAGRAM_FAILED: &str = "Mermaid Render Failed";

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Block {0} has no render trigger")]
    NotRegistered(NodeId),
    #[error("Block {0} has no rendered document")]
    NoDocument(NodeId),
    #[error("Failed to open preview: {0}")]
    Open(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivateOutcome {
    /// A render ran to completion and ended in this state
    Rendered(ArtifactState),
    Closed,
    /// Activation while rendering; nothing happened
    Ignored,
}

struct BlockEntry {
    source: SourceBlock,
    classification: Classification,
    slot: ArtifactSlot,
}

/// Final values for an artifact once its render completes
struct Completion {
    state: ArtifactState,
    status: String,
    content: ArtifactContent,
    badges: Vec<Badge>,
    fixes: Vec<Fix>,
    handle: Option<ResourceHandle>,
}

impl Completion {
    fn failed(status: impl Into<String>, content: ArtifactContent) -> Self {
        Self {
            state: ArtifactState::Error,
            status: status.into(),
            content,
            badges: Vec::new(),
            fixes: Vec::new(),
            handle: None,
        }
    }
}

pub struct RenderController {
    fetch: FetchAdapter,
    diagrams: DiagramRenderer,
    store: Arc<ResourceStore>,
    surface: Arc<dyn Surface>,
    base_url: String,
    blocks: Mutex<HashMap<NodeId, BlockEntry>>,
}

impl RenderController {
    pub fn new(
        fetch: FetchAdapter,
        store: Arc<ResourceStore>,
        surface: Arc<dyn Surface>,
        diagram_endpoint: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            diagrams: DiagramRenderer::new(fetch.clone(), diagram_endpoint),
            fetch,
            store,
            surface,
            base_url: base_url.into(),
            blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        fetch: FetchAdapter,
        store: Arc<ResourceStore>,
        surface: Arc<dyn Surface>,
        config: &Config,
    ) -> Self {
        Self::new(
            fetch,
            store,
            surface,
            config.render.diagram_endpoint.clone(),
            config.page.base_url.clone(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, BlockEntry>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify a discovered block and attach a trigger if it is renderable.
    ///
    /// Registering an already registered block changes nothing.
    pub fn register(&self, block: NodeId, source: SourceBlock) -> Classification {
        let classification = source.classify();
        let Some(kind) = ArtifactKind::for_classification(classification) else {
            return classification;
        };
        let Some(label) = classify::trigger_label(classification, &source.text) else {
            return classification;
        };

        let trigger = {
            let mut blocks = self.lock();
            if let Some(existing) = blocks.get(&block) {
                return existing.classification;
            }
            let slot = ArtifactSlot::new(kind, label);
            let trigger = trigger_view(&slot);
            blocks.insert(
                block,
                BlockEntry {
                    source,
                    classification,
                    slot,
                },
            );
            trigger
        };

        logging::debug(&format!(
            "Attached trigger to {} ({})",
            block,
            classification.as_str()
        ));
        self.surface.trigger_changed(block, &trigger);
        classification
    }

    pub fn is_registered(&self, block: NodeId) -> bool {
        self.lock().contains_key(&block)
    }

    /// Registered blocks in id order
    pub fn blocks(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn classification(&self, block: NodeId) -> Option<Classification> {
        self.lock().get(&block).map(|entry| entry.classification)
    }

    pub fn state(&self, block: NodeId) -> Option<ArtifactState> {
        self.lock().get(&block).map(|entry| entry.slot.state())
    }

    pub fn view(&self, block: NodeId) -> Option<ArtifactView> {
        self.lock()
            .get(&block)
            .and_then(|entry| entry.slot.artifact().map(|artifact| artifact.view()))
    }

    pub fn fixes(&self, block: NodeId) -> Vec<Fix> {
        self.lock()
            .get(&block)
            .and_then(|entry| entry.slot.artifact().map(|artifact| artifact.fixes.clone()))
            .unwrap_or_default()
    }

    /// URL of the rendered document, when the block shows one
    pub fn document_url(&self, block: NodeId) -> Option<String> {
        self.lock().get(&block).and_then(|entry| {
            entry
                .slot
                .artifact()
                .filter(|artifact| artifact.state == ArtifactState::Ready)
                .and_then(|artifact| artifact.handle_url().map(str::to_string))
        })
    }

    /// Handle a click on the block's trigger control.
    ///
    /// Idle renders, ready/error closes, and rendering ignores the click.
    pub async fn activate(&self, block: NodeId) -> Result<ActivateOutcome, LifecycleError> {
        let (kind, source, view, trigger) = {
            let mut blocks = self.lock();
            let entry = blocks
                .get_mut(&block)
                .ok_or(LifecycleError::NotRegistered(block))?;
            match entry.slot.toggle() {
                Toggle::Ignored => return Ok(ActivateOutcome::Ignored),
                Toggle::Close => {
                    entry.slot.close(&self.store);
                    let trigger = trigger_view(&entry.slot);
                    drop(blocks);
                    logging::info(&format!("Closed preview for {}", block));
                    self.surface.artifact_removed(block);
                    self.surface.trigger_changed(block, &trigger);
                    return Ok(ActivateOutcome::Closed);
                }
                Toggle::Render => {}
            }
            let kind = entry.slot.kind();
            let status = match kind {
                ArtifactKind::DocumentPreview => STATUS_INITIALIZING,
                ArtifactKind::DiagramPreview => STATUS_DIAGRAM_PENDING,
            };
            let view = entry.slot.begin(&self.store, status).view();
            (kind, entry.source.clone(), view, trigger_view(&entry.slot))
        };

        logging::set_block(&block.to_string(), kind.as_str());
        logging::info(&format!("Rendering {}", kind.as_str()));
        self.surface.trigger_changed(block, &trigger);
        self.surface.artifact_changed(block, &view);

        let completion = match kind {
            ArtifactKind::DocumentPreview => self.render_document(block, &source).await,
            ArtifactKind::DiagramPreview => self.render_diagram(&source).await,
        };
        let state = self.finish(block, completion);
        logging::info(&format!("Render finished: {}", state.as_str()));
        logging::clear_context();
        Ok(ActivateOutcome::Rendered(state))
    }

    async fn render_document(&self, block: NodeId, source: &SourceBlock) -> Completion {
        let status = |line: &str| self.set_status(block, line);
        match assemble::assemble(&self.fetch, &source.text, &self.base_url, &status).await {
            Ok(document) => {
                if document.failed > 0 {
                    logging::warn(&format!(
                        "{} of {} external resource(s) could not be embedded",
                        document.failed,
                        document.failed + document.inlined
                    ));
                }
                let trusted = trust::admit_document(&document.html);
                let handle = self
                    .store
                    .create(trusted.into_string().into_bytes(), "text/html");
                Completion {
                    state: ArtifactState::Ready,
                    status: STATUS_DOCUMENT_READY.to_string(),
                    content: ArtifactContent::Document {
                        url: handle.url().to_string(),
                    },
                    badges: Vec::new(),
                    fixes: Vec::new(),
                    handle: Some(handle),
                }
            }
            Err(e) => {
                logging::error(&format!("Document rendering failed: {}", e));
                let message = format!("Fatal Error: {}", e);
                Completion::failed(message.clone(), ArtifactContent::ErrorText(message))
            }
        }
    }

    async fn render_diagram(&self, source: &SourceBlock) -> Completion {
        let corrected = chatrender_mermaid_fix::correct(&source.text);
        logging::debug(&format!("Processed diagram source:\n{}", corrected.code));
        if !corrected.is_clean() {
            logging::debug(&format!("Fixes applied:\n{}", corrected.summary()));
        }

        match self.diagrams.render(&corrected.code).await {
            Ok(svg) => {
                let mut badges = Vec::new();
                if diagram::is_clean_render(&svg) {
                    badges.push(Badge::Success);
                    if !corrected.is_clean() {
                        badges.push(Badge::warning_for(&corrected.fixes));
                    }
                } else {
                    logging::warn("Diagram service answered with an error drawing");
                }
                Completion {
                    state: ArtifactState::Ready,
                    status: STATUS_DIAGRAM_READY.to_string(),
                    content: ArtifactContent::Markup(trust::admit_inline(&svg)),
                    badges,
                    fixes: corrected.fixes,
                    handle: None,
                }
            }
            Err(e) => {
                logging::error(&format!("Diagram rendering error: {}", e));
                let content = match diagram::failure_content(&e) {
                    DiagramFailure::Embedded(markup) => ArtifactContent::ErrorMarkup(markup),
                    DiagramFailure::Text(text) => ArtifactContent::ErrorText(text),
                };
                let mut completion = Completion::failed(STATUS_DIAGRAM_FAILED, content);
                completion.fixes = corrected.fixes;
                completion
            }
        }
    }

    fn set_status(&self, block: NodeId, line: &str) {
        let view = {
            let mut blocks = self.lock();
            let Some(artifact) = blocks
                .get_mut(&block)
                .and_then(|entry| entry.slot.artifact_mut())
            else {
                return;
            };
            artifact.status = line.to_string();
            artifact.view()
        };
        self.surface.artifact_changed(block, &view);
    }

    fn finish(&self, block: NodeId, completion: Completion) -> ArtifactState {
        let Completion {
            state,
            status,
            content,
            badges,
            fixes,
            handle,
        } = completion;

        let updated = {
            let mut blocks = self.lock();
            match blocks.get_mut(&block) {
                Some(entry) => match entry.slot.artifact_mut() {
                    Some(artifact) => {
                        artifact.state = state;
                        artifact.status = status;
                        artifact.content = content;
                        artifact.badges = badges;
                        artifact.fixes = fixes;
                        if let Some(handle) = handle {
                            artifact.attach_handle(&self.store, handle);
                        }
                        Some((artifact.view(), trigger_view(&entry.slot)))
                    }
                    None => {
                        if let Some(handle) = handle {
                            self.store.revoke(handle);
                        }
                        None
                    }
                },
                None => {
                    if let Some(handle) = handle {
                        self.store.revoke(handle);
                    }
                    None
                }
            }
        };

        if let Some((view, trigger)) = updated {
            self.surface.artifact_changed(block, &view);
            self.surface.trigger_changed(block, &trigger);
        }
        state
    }

    /// Open a ready document in a new viewing context
    pub fn open_externally(
        &self,
        block: NodeId,
        opener: &dyn TabOpener,
    ) -> Result<String, LifecycleError> {
        if !self.is_registered(block) {
            return Err(LifecycleError::NotRegistered(block));
        }
        let url = self
            .document_url(block)
            .ok_or(LifecycleError::NoDocument(block))?;
        opener
            .open_in_new_tab(&url)
            .map_err(|e| LifecycleError::Open(e.to_string()))?;
        logging::info(&format!("Opened {} externally", url));
        Ok(url)
    }
}

fn trigger_view(slot: &ArtifactSlot) -> TriggerView {
    TriggerView {
        label: slot.trigger_label().to_string(),
        disabled: slot.trigger_disabled(),
    }
}
