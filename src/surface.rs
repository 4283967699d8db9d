//! Display surface contract
//!
//! The host decides how things look. This crate only pushes views: the
//! trigger control of each block, the artifact after it, and the state of
//! each image link.

use crate::artifact::ArtifactView;
use crate::host::NodeId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerView {
    pub label: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkView {
    Placeholder(String),
    Image { url: String },
    Error(String),
}

pub trait Surface: Send + Sync {
    fn trigger_changed(&self, block: NodeId, trigger: &TriggerView);

    fn artifact_changed(&self, block: NodeId, artifact: &ArtifactView);

    fn artifact_removed(&self, block: NodeId);

    fn link_changed(&self, link: NodeId, view: &LinkView);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Trigger(NodeId, TriggerView),
    Artifact(NodeId, ArtifactView),
    Removed(NodeId),
    Link(NodeId, LinkView),
}

#[derive(Debug, Default)]
struct Recorded {
    triggers: HashMap<NodeId, TriggerView>,
    artifacts: HashMap<NodeId, ArtifactView>,
    links: HashMap<NodeId, LinkView>,
    events: Vec<SurfaceEvent>,
}

/// Keeps the latest view of everything plus the full event history
#[derive(Debug, Default)]
pub struct RecordingSurface {
    inner: Mutex<Recorded>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trigger(&self, block: NodeId) -> Option<TriggerView> {
        self.lock().triggers.get(&block).cloned()
    }

    pub fn artifact(&self, block: NodeId) -> Option<ArtifactView> {
        self.lock().artifacts.get(&block).cloned()
    }

    pub fn link(&self, link: NodeId) -> Option<LinkView> {
        self.lock().links.get(&link).cloned()
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.lock().events.clone()
    }

    /// Status lines pushed for `block`, in order, without repeats
    pub fn status_history(&self, block: NodeId) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for event in self.lock().events.iter() {
            if let SurfaceEvent::Artifact(id, view) = event {
                if *id == block && out.last() != Some(&view.status) {
                    out.push(view.status.clone());
                }
            }
        }
        out
    }
}

impl Surface for RecordingSurface {
    fn trigger_changed(&self, block: NodeId, trigger: &TriggerView) {
        let mut inner = self.lock();
        inner.triggers.insert(block, trigger.clone());
        inner.events.push(SurfaceEvent::Trigger(block, trigger.clone()));
    }

    fn artifact_changed(&self, block: NodeId, artifact: &ArtifactView) {
        let mut inner = self.lock();
        inner.artifacts.insert(block, artifact.clone());
        inner
            .events
            .push(SurfaceEvent::Artifact(block, artifact.clone()));
    }

    fn artifact_removed(&self, block: NodeId) {
        let mut inner = self.lock();
        inner.artifacts.remove(&block);
        inner.events.push(SurfaceEvent::Removed(block));
    }

    fn link_changed(&self, link: NodeId, view: &LinkView) {
        let mut inner = self.lock();
        inner.links.insert(link, view.clone());
        inner.events.push(SurfaceEvent::Link(link, view.clone()));
    }
}
