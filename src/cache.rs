//! Chunked fetch-on-demand page cache
//!
//! Pages are served from three tiers: the pages bundled with the initial
//! load, chunks already fetched this session, and finally the backend. Chunk
//! fetches are deduplicated and go through canonical-slug redirect handling.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use lru::LruCache;

use crate::backend::{ChunkRequest, DocumentBackend, FetchError, fetch_canonical};
use crate::inflight::SingleFlight;
use crate::model::{Page, SourceKind};
use crate::normalizer::{self, DocumentKind};
use crate::session::DocumentSession;

pub const DEFAULT_CHUNK_CAPACITY: usize = 256;

/// Chunk containing `render_index`: `(chunk_start, offset_in_chunk)`
#[must_use]
pub fn chunk_position(render_index: usize, chunk_size: usize) -> (usize, usize) {
    let chunk_size = chunk_size.max(1);
    let chunk_start = (render_index / chunk_size) * chunk_size;
    (chunk_start, render_index - chunk_start)
}

/// Identity of one fetched chunk
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub document_id: String,
    pub version_id: Option<String>,
    pub chunk_start: usize,
    pub chunk_size: usize,
}

type Chunk = Arc<Vec<Page>>;

pub struct PaginatedContentCache<B> {
    backend: Arc<B>,
    session: Arc<DocumentSession>,
    chunks: Mutex<LruCache<ChunkKey, Chunk>>,
    inflight: SingleFlight<ChunkKey, Result<Chunk, FetchError>>,
    network_fetches: AtomicUsize,
}

impl<B: DocumentBackend> PaginatedContentCache<B> {
    pub fn new(backend: Arc<B>, session: Arc<DocumentSession>) -> Self {
        Self::with_capacity(backend, session, DEFAULT_CHUNK_CAPACITY)
    }

    /// Create a cache keeping at most `capacity` fetched chunks
    pub fn with_capacity(backend: Arc<B>, session: Arc<DocumentSession>, capacity: usize) -> Self {
        Self {
            backend,
            session,
            chunks: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            inflight: SingleFlight::new(),
            network_fetches: AtomicUsize::new(0),
        }
    }

    pub fn session(&self) -> &Arc<DocumentSession> {
        &self.session
    }

    /// Page at `render_index` of `(document_id, version_id)`.
    ///
    /// `Ok(None)` means the index lies outside the document: past the known
    /// total, or past the end of a short tail chunk.
    pub async fn get_page(
        &self,
        document_id: &str,
        version_id: Option<&str>,
        render_index: usize,
    ) -> Result<Option<Page>, FetchError> {
        let own_document = self.session.is_for(document_id, version_id);

        if own_document {
            if !self.session.in_range(render_index) {
                debug!("Render index {render_index} out of range for {document_id}");
                return Ok(None);
            }
            if let Some(page) = self.session.bundled_pages().get(render_index) {
                return Ok(Some(page.clone()));
            }
            if self.session.kind() == DocumentKind::Pdf {
                // Frames are drawn by the PDF viewer; only their count is known here
                let known = self.session.total_render_count() > 0;
                return Ok(known.then_some(Page::Pdf {
                    frame_index: render_index,
                }));
            }
        }

        let (chunk_start, offset) = chunk_position(render_index, self.session.chunk_size());
        let key = ChunkKey {
            document_id: document_id.to_string(),
            version_id: version_id.map(str::to_string),
            chunk_start,
            chunk_size: self.session.chunk_size(),
        };

        let chunk = self.chunk(&key).await?;
        Ok(chunk.get(offset).cloned())
    }

    /// Page of this session's document
    pub async fn page(&self, render_index: usize) -> Result<Option<Page>, FetchError> {
        let document_id = self.session.document_id().to_string();
        let version_id = self.session.version_id().map(str::to_string);
        self.get_page(&document_id, version_id.as_deref(), render_index)
            .await
    }

    /// Whether `render_index` can be served without a network call
    #[must_use]
    pub fn is_resident(&self, render_index: usize) -> bool {
        if render_index < self.session.bundled_pages().len() {
            return true;
        }
        if self.session.kind() == DocumentKind::Pdf {
            return self.session.total_render_count() > render_index;
        }
        let (chunk_start, _) = chunk_position(render_index, self.session.chunk_size());
        let key = self.own_key(chunk_start);
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    /// Number of chunk requests that reached the backend
    #[must_use]
    pub fn network_fetches(&self) -> usize {
        self.network_fetches.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every fetched chunk
    pub fn clear(&self) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn own_key(&self, chunk_start: usize) -> ChunkKey {
        ChunkKey {
            document_id: self.session.document_id().to_string(),
            version_id: self.session.version_id().map(str::to_string),
            chunk_start,
            chunk_size: self.session.chunk_size(),
        }
    }

    async fn chunk(&self, key: &ChunkKey) -> Result<Chunk, FetchError> {
        if let Some(chunk) = self.cached(key) {
            return Ok(chunk);
        }

        self.inflight.run(key, || self.fetch_and_store(key)).await
    }

    async fn fetch_and_store(&self, key: &ChunkKey) -> Result<Chunk, FetchError> {
        // A request that settled between the cache lookup and taking the
        // in-flight slot has already filled the cache.
        if let Some(chunk) = self.cached(key) {
            return Ok(chunk);
        }
        let chunk = self.fetch_chunk(key).await?;
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key.clone(), chunk.clone());
        Ok(chunk)
    }

    fn cached(&self, key: &ChunkKey) -> Option<Chunk> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn fetch_chunk(&self, key: &ChunkKey) -> Result<Chunk, FetchError> {
        debug!(
            "Fetching chunk {}..{} of {}",
            key.chunk_start,
            key.chunk_start + key.chunk_size,
            key.document_id
        );
        self.network_fetches.fetch_add(1, Ordering::Relaxed);

        let request = ChunkRequest::new(
            &key.document_id,
            key.version_id.as_deref(),
            key.chunk_start,
            key.chunk_size,
        );
        let payload = fetch_canonical(self.backend.as_ref(), self.session.slugs(), &request)
            .await
            .inspect_err(|e| warn!("Chunk fetch at {} failed: {e}", key.chunk_start))?;

        let source = payload
            .content
            .source
            .as_deref()
            .and_then(SourceKind::from_wire)
            .or_else(|| self.session_source())
            .ok_or_else(|| FetchError::malformed("chunk response without a known source"))?;

        let mut pages = normalizer::normalize_pages(source, &payload.content.pages, key.chunk_start);
        pages.truncate(key.chunk_size);
        Ok(Arc::new(pages))
    }

    fn session_source(&self) -> Option<SourceKind> {
        match self.session.kind() {
            DocumentKind::RichText => Some(SourceKind::RichText),
            DocumentKind::Block => Some(SourceKind::Block),
            DocumentKind::Pdf => Some(SourceKind::Pdf),
            DocumentKind::Unsupported => None,
        }
    }
}
