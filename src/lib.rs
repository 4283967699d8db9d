//! Live previews for chat-page code blocks and generated-image links.
//!
//! The host page is reached only through injected collaborators: a
//! [`host::HostTree`] and [`host::Locator`] to read it, a
//! [`fetch::FetchCapability`] for outbound requests, a [`surface::Surface`]
//! to display results, and an [`opener::TabOpener`].

pub mod artifact;
pub mod assemble;
pub mod classify;
pub mod config;
pub mod diagram;
pub mod dispatcher;
pub mod fetch;
pub mod host;
pub mod link;
pub mod logging;
pub mod opener;
pub mod pipeline;
pub mod resources;
pub mod surface;
pub mod trust;
pub mod util;

pub use chatrender_mermaid_fix as mermaid_fix;

pub use artifact::{ArtifactKind, ArtifactState, ArtifactView, Badge};
pub use classify::{Classification, SourceBlock};
pub use dispatcher::{Dispatcher, HostEvent, ProcessedSet};
pub use fetch::{FetchAdapter, FetchCapability, FetchError};
pub use host::{GeminiLocator, HostTree, Locator, MemoryTree, NodeId};
pub use pipeline::{ActivateOutcome, LifecycleError, RenderController};
pub use resources::ResourceStore;
pub use surface::{RecordingSurface, Surface};
