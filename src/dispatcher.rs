//! Tree-change dispatcher
//!
//! The host pushes [`HostEvent`]s into a channel; the dispatcher routes
//! inserted code blocks to the render controller and image links to the
//! link resolver. Renders and image fetches run as tasks so a slow request
//! never holds up discovery.

use crate::config::Config;
use crate::fetch::FetchAdapter;
use crate::host::{HostTree, Locator, NodeId};
use crate::link::{ImageLinkPatterns, LinkResolver};
use crate::logging;
use crate::opener::TabOpener;
use crate::pipeline::RenderController;
use crate::resources::ResourceStore;
use crate::surface::Surface;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A batch of nodes was added to the live tree
    Inserted(Vec<NodeId>),
    /// The user clicked a block's trigger control
    Activate(NodeId),
    OpenExternally(NodeId),
    Shutdown,
}

/// Channel the host uses to feed a running dispatcher
pub fn event_channel() -> (mpsc::Sender<HostEvent>, mpsc::Receiver<HostEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Blocks and links that have already been handled. Set-once.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    blocks: Mutex<HashSet<NodeId>>,
    links: Mutex<HashSet<NodeId>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `block` was not marked before
    pub fn mark_block(&self, block: NodeId) -> bool {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block)
    }

    /// Returns true if `link` was not marked before
    pub fn mark_link(&self, link: NodeId) -> bool {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(link)
    }

    pub fn contains_block(&self, block: NodeId) -> bool {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&block)
    }

    pub fn contains_link(&self, link: NodeId) -> bool {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&link)
    }
}

/// What one discovery pass found
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Blocks that got a trigger in this pass
    pub blocks: Vec<NodeId>,
    /// Link candidates with their targets, not yet resolved
    pub links: Vec<(NodeId, String)>,
}

pub struct Dispatcher {
    tree: Arc<dyn HostTree>,
    locator: Arc<dyn Locator>,
    controller: Arc<RenderController>,
    links: Arc<LinkResolver>,
    processed: Arc<ProcessedSet>,
    opener: Option<Arc<dyn TabOpener>>,
}

impl Dispatcher {
    pub fn new(
        tree: Arc<dyn HostTree>,
        locator: Arc<dyn Locator>,
        controller: Arc<RenderController>,
        links: Arc<LinkResolver>,
        processed: Arc<ProcessedSet>,
    ) -> Self {
        Self {
            tree,
            locator,
            controller,
            links,
            processed,
            opener: None,
        }
    }

    /// Wire up a controller and link resolver sharing one store and surface
    pub fn from_config(
        tree: Arc<dyn HostTree>,
        locator: Arc<dyn Locator>,
        fetch: FetchAdapter,
        store: Arc<ResourceStore>,
        surface: Arc<dyn Surface>,
        config: &Config,
    ) -> Self {
        let processed = Arc::new(ProcessedSet::new());
        let controller = Arc::new(RenderController::from_config(
            fetch.clone(),
            store.clone(),
            surface.clone(),
            config,
        ));
        let links = Arc::new(LinkResolver::new(
            fetch,
            store,
            surface,
            processed.clone(),
            ImageLinkPatterns::from(&config.images),
        ));
        Self::new(tree, locator, controller, links, processed)
    }

    pub fn with_opener(mut self, opener: Arc<dyn TabOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn controller(&self) -> &Arc<RenderController> {
        &self.controller
    }

    pub fn links(&self) -> &Arc<LinkResolver> {
        &self.links
    }

    pub fn processed(&self) -> &Arc<ProcessedSet> {
        &self.processed
    }

    /// Check each node and everything below it against both locators.
    ///
    /// Blocks are registered here; a block that is not renderable yet stays
    /// unmarked so a later batch can pick it up once its content is complete.
    pub fn discover(&self, nodes: &[NodeId]) -> Discovered {
        let tree = self.tree.as_ref();
        let mut found = Discovered::default();
        let mut seen_links = HashSet::new();

        for &node in nodes {
            let candidates = std::iter::once(node).chain(tree.descendants(node));
            for candidate in candidates {
                if self.locator.is_code_block(tree, candidate)
                    && !self.processed.contains_block(candidate)
                {
                    let Some(source) = self.locator.read_block(tree, candidate) else {
                        continue;
                    };
                    let classification = self.controller.register(candidate, source);
                    if classification.is_renderable() && self.processed.mark_block(candidate) {
                        found.blocks.push(candidate);
                    }
                } else if self.locator.is_image_link(tree, candidate)
                    && !self.processed.contains_link(candidate)
                    && seen_links.insert(candidate)
                {
                    if let Some(href) = self.locator.link_target(tree, candidate) {
                        found.links.push((candidate, href));
                    }
                }
            }
        }
        found
    }

    /// Discovery over the whole tree, for content present before observation
    pub fn initial_scan(&self) -> Discovered {
        self.discover(&[self.tree.root()])
    }

    fn spawn_links(&self, tasks: &mut JoinSet<()>, links: Vec<(NodeId, String)>) {
        for (link, href) in links {
            let resolver = self.links.clone();
            tasks.spawn(async move {
                resolver.resolve(link, &href).await;
                logging::clear_context();
            });
        }
    }

    fn spawn_activate(&self, tasks: &mut JoinSet<()>, block: NodeId) {
        let controller = self.controller.clone();
        tasks.spawn(async move {
            if let Err(e) = controller.activate(block).await {
                logging::warn(&format!("Activation ignored: {}", e));
            }
        });
    }

    fn open_externally(&self, block: NodeId) {
        let Some(opener) = &self.opener else {
            logging::warn("No tab opener configured");
            return;
        };
        if let Err(e) = self.controller.open_externally(block, opener.as_ref()) {
            logging::warn(&e.to_string());
        }
    }

    /// Process events until `Shutdown` or until every sender is gone.
    ///
    /// Starts with the initial scan. In-flight renders are never cancelled;
    /// the loop waits for them before returning.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<HostEvent>) {
        let mut tasks = JoinSet::new();

        let initial = self.initial_scan();
        logging::info(&format!(
            "Initial scan: {} block(s), {} link(s)",
            initial.blocks.len(),
            initial.links.len()
        ));
        self.spawn_links(&mut tasks, initial.links);

        while let Some(event) = events.recv().await {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    logging::error(&format!("Dispatcher task failed: {}", e));
                }
            }

            match event {
                HostEvent::Inserted(nodes) => {
                    let found = self.discover(&nodes);
                    self.spawn_links(&mut tasks, found.links);
                }
                HostEvent::Activate(block) => self.spawn_activate(&mut tasks, block),
                HostEvent::OpenExternally(block) => self.open_externally(block),
                HostEvent::Shutdown => break,
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                logging::error(&format!("Dispatcher task failed: {}", e));
            }
        }
        logging::info("Dispatcher stopped");
    }
}
