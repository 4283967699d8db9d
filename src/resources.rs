//! In-memory object references
//!
//! Generated documents and fetched images are held here and exposed through
//! `blob:` style URLs. A [`ResourceHandle`] is not `Clone`: revoking consumes
//! it, so a handle can only be released once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const URL_PREFIX: &str = "blob:chatrender/";

/// Owning reference to one stored resource
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    url: String,
}

impl ResourceHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Default)]
pub struct ResourceStore {
    entries: Mutex<HashMap<String, Resource>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: Vec<u8>, mime: &str) -> ResourceHandle {
        let url = format!("{}{}", URL_PREFIX, uuid::Uuid::new_v4());
        let resource = Resource {
            mime: mime.to_string(),
            bytes: bytes.into(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), resource);
        ResourceHandle { url }
    }

    /// Release a resource. Returns false if it was already gone.
    pub fn revoke(&self, handle: ResourceHandle) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.url)
            .is_some()
    }

    pub fn get(&self, url: &str) -> Option<Resource> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Number of resources not yet revoked
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_resource_url(url: &str) -> bool {
        url.starts_with(URL_PREFIX)
    }
}
