//! Mock work catalog for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{BackendError, CatalogPage, WorkCatalog};
use crate::item::WorkItem;

/// Mock implementation of the WorkCatalog trait.
///
/// Serves a fixed list of items in 1-based pages and records which pages
/// were requested.
#[derive(Debug, Default)]
pub struct MockCatalog {
    items: Arc<RwLock<Vec<WorkItem>>>,
    /// Pages requested, in order.
    requested: Arc<RwLock<Vec<u32>>>,
    /// If set, the next page request fails with this error.
    next_error: Arc<RwLock<Option<BackendError>>>,
}

impl MockCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog serving the given items.
    pub fn with_items(items: Vec<WorkItem>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
            ..Self::default()
        }
    }

    pub async fn set_items(&self, items: Vec<WorkItem>) {
        *self.items.write().await = items;
    }

    /// Replace one item in place, e.g. to mirror a host-side update.
    pub async fn update_item<F>(&self, item_id: &str, f: F)
    where
        F: FnOnce(&mut WorkItem),
    {
        if let Some(item) = self.items.write().await.iter_mut().find(|i| i.id == item_id) {
            f(item);
        }
    }

    pub async fn requested_pages(&self) -> Vec<u32> {
        self.requested.read().await.clone()
    }

    /// Make the next page request fail.
    pub async fn fail_next(&self, error: BackendError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl WorkCatalog for MockCatalog {
    async fn page(&self, page: u32, page_size: u32) -> Result<CatalogPage, BackendError> {
        self.requested.write().await.push(page);

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let items = self.items.read().await;
        let size = page_size.max(1) as usize;
        let total_pages = items.len().div_ceil(size) as u32;
        let start = (page.saturating_sub(1) as usize).saturating_mul(size);

        Ok(CatalogPage {
            items: items.iter().skip(start).take(size).cloned().collect(),
            total_pages,
        })
    }
}
