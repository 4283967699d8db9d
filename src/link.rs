//! Generated-image links
//!
//! A link to a generated image (directly, or wrapped in a search URL) is
//! swapped for a placeholder and then for the fetched image. The swap is
//! one-way: a failed link keeps its error text for good.

use crate::config::ImageConfig;
use crate::dispatcher::ProcessedSet;
use crate::fetch::{FetchAdapter, FetchError};
use crate::host::NodeId;
use crate::logging;
use crate::resources::{ResourceHandle, ResourceStore};
use crate::surface::{LinkView, Surface};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub const PLACEHOLDER_TEXT: &str = "Loading Pollinations image...";

/// The two accepted link shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLinkPatterns {
    pub direct_prefix: String,
    pub wrapper_marker: String,
    pub wrapper_param: String,
}

impl Default for ImageLinkPatterns {
    fn default() -> Self {
        Self::from(&ImageConfig::default())
    }
}

impl From<&ImageConfig> for ImageLinkPatterns {
    fn from(config: &ImageConfig) -> Self {
        Self {
            direct_prefix: config.direct_prefix.clone(),
            wrapper_marker: config.wrapper_marker.clone(),
            wrapper_param: config.wrapper_param.clone(),
        }
    }
}

impl ImageLinkPatterns {
    /// The image URL a link points at, if it has either shape
    pub fn extract(&self, href: &str) -> Option<String> {
        if href.starts_with(&self.direct_prefix) {
            return Some(href.to_string());
        }
        if !href.contains(&self.wrapper_marker) {
            return None;
        }
        let wrapper = url::Url::parse(href).ok()?;
        wrapper
            .query_pairs()
            .find(|(name, _)| *name == self.wrapper_param)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Neither shape; the link was left alone and not marked
    Ignored,
    AlreadyProcessed,
    Image { url: String },
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
enum ImageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Image could not be decoded")]
    Undecodable,
}

pub struct LinkResolver {
    fetch: FetchAdapter,
    store: Arc<ResourceStore>,
    surface: Arc<dyn Surface>,
    processed: Arc<ProcessedSet>,
    patterns: ImageLinkPatterns,
    images: Mutex<HashMap<NodeId, ResourceHandle>>,
}

impl LinkResolver {
    pub fn new(
        fetch: FetchAdapter,
        store: Arc<ResourceStore>,
        surface: Arc<dyn Surface>,
        processed: Arc<ProcessedSet>,
        patterns: ImageLinkPatterns,
    ) -> Self {
        Self {
            fetch,
            store,
            surface,
            processed,
            patterns,
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Replace `link` with the image its `href` points at
    pub async fn resolve(&self, link: NodeId, href: &str) -> LinkOutcome {
        let Some(image_url) = self.patterns.extract(href) else {
            return LinkOutcome::Ignored;
        };
        if !self.processed.mark_link(link) {
            return LinkOutcome::AlreadyProcessed;
        }

        logging::set_link(&link.to_string());
        self.surface
            .link_changed(link, &LinkView::Placeholder(PLACEHOLDER_TEXT.to_string()));

        match self.load(&image_url).await {
            Ok(handle) => {
                let url = handle.url().to_string();
                logging::info(&format!("Image ready for {}: {}", link, image_url));
                self.images
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(link, handle);
                self.surface
                    .link_changed(link, &LinkView::Image { url: url.clone() });
                LinkOutcome::Image { url }
            }
            Err(e) => {
                let message = format!("Image failed to load: {}", e);
                logging::error(&format!("Image render error for {}: {}", image_url, e));
                self.surface
                    .link_changed(link, &LinkView::Error(message.clone()));
                LinkOutcome::Failed(message)
            }
        }
    }

    async fn load(&self, image_url: &str) -> Result<ResourceHandle, ImageError> {
        let bytes = self.fetch.get_binary(image_url).await?;
        let format = image::guess_format(&bytes).map_err(|_| ImageError::Undecodable)?;
        logging::debug(&format!("{} is {:?}", image_url, format));
        Ok(self.store.create(bytes, format.to_mime_type()))
    }

    /// URL currently shown in place of `link`
    pub fn image_url(&self, link: NodeId) -> Option<String> {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&link)
            .map(|handle| handle.url().to_string())
    }
}
