//! Resolves semantic locators to render indices

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::backend::{DocumentBackend, FetchError, PageIndexRequest};
use crate::inflight::SingleFlight;
use crate::model::{PageLocator, SearchHit};
use crate::session::DocumentSession;

/// Key of one page-index lookup
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub document_id: String,
    pub version_id: Option<String>,
    pub page: u32,
    pub volume: Option<String>,
}

pub struct LocatorIndexResolver<B> {
    backend: Arc<B>,
    session: Arc<DocumentSession>,
    resolved: Mutex<HashMap<PageKey, Option<usize>>>,
    inflight: SingleFlight<PageKey, Result<Option<usize>, FetchError>>,
}

impl<B: DocumentBackend> LocatorIndexResolver<B> {
    pub fn new(backend: Arc<B>, session: Arc<DocumentSession>) -> Self {
        Self {
            backend,
            session,
            resolved: Mutex::new(HashMap::new()),
            inflight: SingleFlight::new(),
        }
    }

    /// Render index of `locator`, or `None` when it can't be resolved.
    ///
    /// `None` is not an error: callers treat it as "navigation does nothing".
    pub async fn resolve(&self, locator: &PageLocator) -> Option<usize> {
        match locator {
            PageLocator::Render { render_index } => Some(*render_index),
            PageLocator::Chapter { chapter_index } => {
                let heading = self.session.heading(*chapter_index)?;
                if let Some(render_index) = heading.render_index {
                    return Some(render_index);
                }
                match heading.locator {
                    // A chapter pointing at another chapter can't make progress
                    Some(PageLocator::Chapter { .. }) | None => None,
                    Some(PageLocator::Render { render_index }) => Some(render_index),
                    Some(PageLocator::Page { page, volume }) => {
                        self.resolve_page(page, volume.as_deref()).await
                    }
                }
            }
            PageLocator::Page { page, volume } => self.resolve_page(*page, volume.as_deref()).await,
        }
    }

    pub async fn resolve_search_hit(&self, hit: &SearchHit) -> Option<usize> {
        let locator = hit.locator()?;
        self.resolve(&locator).await
    }

    /// Answer from a previous lookup, without touching the network
    #[must_use]
    pub fn cached(&self, page: u32, volume: Option<&str>) -> Option<Option<usize>> {
        self.cached_key(&self.key(page, volume))
    }

    async fn resolve_page(&self, page: u32, volume: Option<&str>) -> Option<usize> {
        if page == 0 {
            debug!("Ignoring page locator below 1");
            return None;
        }

        let key = self.key(page, volume);
        if let Some(answer) = self.cached_key(&key) {
            return answer.filter(|index| self.session.in_range(*index));
        }

        match self.inflight.run(&key, || self.lookup(&key)).await {
            Ok(answer) => answer.filter(|index| self.session.in_range(*index)),
            Err(e) => {
                warn!("Page index lookup for page {page} failed: {e}");
                None
            }
        }
    }

    async fn lookup(&self, key: &PageKey) -> Result<Option<usize>, FetchError> {
        if let Some(answer) = self.cached_key(key) {
            return Ok(answer);
        }

        let request = PageIndexRequest {
            document_id: self.session.canonical_id(),
            page: key.page,
            volume: key.volume.clone(),
            version_id: key.version_id.clone(),
        };
        debug!(
            "Looking up render index of page {} (volume {:?}) in {}",
            key.page, key.volume, request.document_id
        );
        let response = self.backend.lookup_page_index(&request).await?;

        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), response.index);
        Ok(response.index)
    }

    fn cached_key(&self, key: &PageKey) -> Option<Option<usize>> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn key(&self, page: u32, volume: Option<&str>) -> PageKey {
        PageKey {
            document_id: self.session.document_id().to_string(),
            version_id: self.session.version_id().map(str::to_string),
            page,
            volume: volume.map(str::to_string),
        }
    }
}
