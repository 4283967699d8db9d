//! Tab-opening capability

use crate::logging;
use crate::resources::ResourceStore;
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;

/// Opens a URL in a new viewing context
pub trait TabOpener: Send + Sync {
    fn open_in_new_tab(&self, url: &str) -> anyhow::Result<()>;
}

/// Desktop opener: in-memory resources are written to a temp file first
pub struct SystemOpener {
    store: Arc<ResourceStore>,
}

impl SystemOpener {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self { store }
    }

    fn materialize(&self, url: &str) -> anyhow::Result<String> {
        let resource = self
            .store
            .get(url)
            .with_context(|| format!("{} has been released", url))?;
        let suffix = match resource.mime.as_str() {
            "text/html" => ".html",
            "image/png" => ".png",
            "image/jpeg" => ".jpg",
            _ => ".bin",
        };
        let mut file = tempfile::Builder::new()
            .prefix("chatrender-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(&resource.bytes)?;
        let (_, path) = file.keep()?;
        Ok(path.display().to_string())
    }
}

impl TabOpener for SystemOpener {
    fn open_in_new_tab(&self, url: &str) -> anyhow::Result<()> {
        let target = if ResourceStore::is_resource_url(url) {
            self.materialize(url)?
        } else {
            url.to_string()
        };
        logging::info(&format!("Opening {}", target));
        open::that(&target).with_context(|| format!("Failed to open {}", target))?;
        Ok(())
    }
}
