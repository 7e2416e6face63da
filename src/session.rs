//! Per-document session state and the process-wide canonical slug registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::debug;

use crate::model::{Heading, Page};
use crate::normalizer::DocumentKind;

/// Requested slug → canonical slug, shared by every session of the process.
///
/// Append-only: the first mapping recorded for a slug wins. Racing writers for
/// the same slug carry the same value, so losing the race is harmless.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    canonical_of: Mutex<HashMap<String, String>>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical slug for `slug`, or `slug` itself when no redirect is known
    #[must_use]
    pub fn canonical(&self, slug: &str) -> String {
        self.get(slug).unwrap_or_else(|| slug.to_string())
    }

    #[must_use]
    pub fn get(&self, slug: &str) -> Option<String> {
        self.canonical_of
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .cloned()
    }

    /// Record `slug → canonical`. Returns false if a mapping already existed.
    pub fn record(&self, slug: &str, canonical: &str) -> bool {
        if slug == canonical {
            return false;
        }
        let mut map = self
            .canonical_of
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(slug) {
            return false;
        }
        debug!("Recorded canonical slug {slug} -> {canonical}");
        map.insert(slug.to_string(), canonical.to_string());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical_of
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of one (document, version) being read.
///
/// Everything here is discarded when the reader switches document or version;
/// only the shared [`SlugRegistry`] outlives it.
#[derive(Debug)]
pub struct DocumentSession {
    document_id: String,
    version_id: Option<String>,
    kind: DocumentKind,
    chunk_size: usize,
    total_render_count: AtomicUsize,
    bundled_pages: Vec<Page>,
    headings: RwLock<Vec<Heading>>,
    slugs: Arc<SlugRegistry>,
}

impl DocumentSession {
    pub fn new(
        document_id: impl Into<String>,
        version_id: Option<String>,
        kind: DocumentKind,
        chunk_size: usize,
        slugs: Arc<SlugRegistry>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            version_id,
            kind,
            chunk_size: chunk_size.max(1),
            total_render_count: AtomicUsize::new(0),
            bundled_pages: Vec::new(),
            headings: RwLock::new(Vec::new()),
            slugs,
        }
    }

    /// Pages shipped with the initial response, valid at `[0, len)`
    #[must_use]
    pub fn with_bundled_pages(mut self, pages: Vec<Page>) -> Self {
        self.bundled_pages = pages;
        self
    }

    #[must_use]
    pub fn with_headings(self, headings: Vec<Heading>) -> Self {
        self.replace_headings(headings);
        self
    }

    #[must_use]
    pub fn with_total_render_count(self, total: usize) -> Self {
        self.set_total_render_count(total);
        self
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bundled_pages(&self) -> &[Page] {
        &self.bundled_pages
    }

    pub fn slugs(&self) -> &Arc<SlugRegistry> {
        &self.slugs
    }

    /// Canonical id to address the backend with
    #[must_use]
    pub fn canonical_id(&self) -> String {
        self.slugs.canonical(&self.document_id)
    }

    /// Whether `(document_id, version_id)` names this session's document
    #[must_use]
    pub fn is_for(&self, document_id: &str, version_id: Option<&str>) -> bool {
        self.version_id.as_deref() == version_id
            && (self.document_id == document_id || self.canonical_id() == document_id)
    }

    /// Total number of render positions, 0 while unknown
    #[must_use]
    pub fn total_render_count(&self) -> usize {
        self.total_render_count.load(Ordering::Acquire)
    }

    /// PDF documents learn their page count only after the viewer loads
    pub fn set_total_render_count(&self, total: usize) {
        self.total_render_count.store(total, Ordering::Release);
    }

    /// Whether `render_index` is addressable. Unknown totals admit everything.
    #[must_use]
    pub fn in_range(&self, render_index: usize) -> bool {
        let total = self.total_render_count();
        total == 0 || render_index < total
    }

    #[must_use]
    pub fn headings(&self) -> Vec<Heading> {
        self.headings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn heading(&self, index: usize) -> Option<Heading> {
        self.headings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    pub fn replace_headings(&self, headings: Vec<Heading>) {
        *self
            .headings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = headings;
    }
}
