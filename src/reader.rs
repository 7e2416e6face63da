//! Session root: opens documents and wires the reading components together.
//!
//! Each open (document, version) gets fresh session-scoped components. Only
//! the slug registry is shared, since a redirect stays valid for the whole
//! process.

use std::sync::Arc;

use log::{info, warn};

use crate::backend::{ChunkRequest, DocumentBackend, FetchError, fetch_canonical};
use crate::cache::PaginatedContentCache;
use crate::chapters::{self, Chapter};
use crate::controller::{ScrollSurface, VirtualizedScrollController};
use crate::normalizer::{self, DocumentKind, PdfBookmark};
use crate::resolver::LocatorIndexResolver;
use crate::session::{DocumentSession, SlugRegistry};
use crate::settings::Settings;
use crate::share::ShareAnchorCodec;

/// One open document and everything scoped to it
pub struct OpenDocument<B> {
    pub title: Option<String>,
    session: Arc<DocumentSession>,
    chapters: Vec<Chapter>,
    cache: Arc<PaginatedContentCache<B>>,
    resolver: Arc<LocatorIndexResolver<B>>,
    controller: VirtualizedScrollController<B>,
}

impl<B: DocumentBackend + 'static> OpenDocument<B> {
    pub fn session(&self) -> &Arc<DocumentSession> {
        &self.session
    }

    pub fn kind(&self) -> DocumentKind {
        self.session.kind()
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn cache(&self) -> &Arc<PaginatedContentCache<B>> {
        &self.cache
    }

    pub fn resolver(&self) -> &Arc<LocatorIndexResolver<B>> {
        &self.resolver
    }

    pub fn controller(&self) -> &VirtualizedScrollController<B> {
        &self.controller
    }

    /// Called once the PDF viewer has loaded the file and read its outline
    pub fn attach_pdf_outline(&mut self, outline: &[PdfBookmark], page_count: usize) {
        if self.session.kind() != DocumentKind::Pdf {
            warn!(
                "Ignoring PDF outline for {:?} document {}",
                self.session.kind(),
                self.session.document_id()
            );
            return;
        }

        let headings = normalizer::normalize_pdf_outline(outline, page_count);
        info!(
            "PDF {} reports {page_count} pages and {} bookmarks",
            self.session.document_id(),
            headings.len()
        );
        self.session.set_total_render_count(page_count);
        self.chapters = chapters::build(&headings);
        self.session.replace_headings(headings);
    }
}

pub struct Reader<B> {
    backend: Arc<B>,
    slugs: Arc<SlugRegistry>,
    settings: Settings,
    codec: ShareAnchorCodec,
    surface: Arc<dyn ScrollSurface>,
    current: Option<OpenDocument<B>>,
}

impl<B: DocumentBackend + 'static> Reader<B> {
    pub fn new(
        backend: Arc<B>,
        settings: Settings,
        surface: Arc<dyn ScrollSurface>,
    ) -> anyhow::Result<Self> {
        Self::with_slugs(backend, settings, surface, Arc::new(SlugRegistry::new()))
    }

    /// Reader sharing an existing slug registry
    pub fn with_slugs(
        backend: Arc<B>,
        settings: Settings,
        surface: Arc<dyn ScrollSurface>,
        slugs: Arc<SlugRegistry>,
    ) -> anyhow::Result<Self> {
        let codec = ShareAnchorCodec::parse(&settings.share_base_url, settings.default_version.clone())
            .map_err(|e| anyhow::anyhow!("invalid share_base_url {:?}: {e}", settings.share_base_url))?;
        Ok(Self {
            backend,
            slugs,
            settings,
            codec,
            surface,
            current: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn slugs(&self) -> &Arc<SlugRegistry> {
        &self.slugs
    }

    pub fn codec(&self) -> &ShareAnchorCodec {
        &self.codec
    }

    pub fn current(&self) -> Option<&OpenDocument<B>> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut OpenDocument<B>> {
        self.current.as_mut()
    }

    /// Open `(document_id, version_id)`, reusing the open session when it matches.
    ///
    /// Any other open document is replaced once the new one has loaded; a
    /// failed open leaves it in place.
    pub async fn open(
        &mut self,
        document_id: &str,
        version_id: Option<&str>,
    ) -> Result<&OpenDocument<B>, FetchError> {
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|open| open.session.is_for(document_id, version_id));

        if !reuse {
            let opened = self.load(document_id, version_id).await?;
            if let Some(previous) = self.current.replace(opened) {
                info!(
                    "Closing {} (version {:?})",
                    previous.session.document_id(),
                    previous.session.version_id()
                );
            }
        }

        self.current
            .as_ref()
            .ok_or_else(|| FetchError::NotFound {
                document_id: document_id.to_string(),
            })
    }

    /// Reopen the current document at another version
    pub async fn switch_version(
        &mut self,
        version_id: Option<&str>,
    ) -> Result<&OpenDocument<B>, FetchError> {
        let document_id = match &self.current {
            Some(open) => open.session.document_id().to_string(),
            None => {
                return Err(FetchError::NotFound {
                    document_id: String::new(),
                });
            }
        };
        self.open(&document_id, version_id).await
    }

    async fn load(
        &self,
        document_id: &str,
        version_id: Option<&str>,
    ) -> Result<OpenDocument<B>, FetchError> {
        let chunk_size = self.settings.chunk_size.max(1);
        let mut request = ChunkRequest::new(document_id, version_id, 0, chunk_size);
        request.locale = self.settings.locale.clone();
        request.fields = vec!["headings".to_string()];

        let payload = fetch_canonical(self.backend.as_ref(), &self.slugs, &request).await?;
        let normalized = normalizer::normalize(&payload);
        info!(
            "Opened {document_id} ({:?}): {} of {} pages bundled, {} headings",
            normalized.kind,
            normalized.pages.len(),
            normalized.total_count,
            normalized.headings.len()
        );

        let chapters = chapters::build(&normalized.headings);
        let session = Arc::new(
            DocumentSession::new(
                document_id,
                version_id.map(str::to_string),
                normalized.kind,
                chunk_size,
                Arc::clone(&self.slugs),
            )
            .with_bundled_pages(normalized.pages)
            .with_headings(normalized.headings)
            .with_total_render_count(normalized.total_count),
        );

        let cache = Arc::new(PaginatedContentCache::with_capacity(
            Arc::clone(&self.backend),
            Arc::clone(&session),
            self.settings.chunk_cache_capacity,
        ));
        let resolver = Arc::new(LocatorIndexResolver::new(
            Arc::clone(&self.backend),
            Arc::clone(&session),
        ));
        let controller = VirtualizedScrollController::new(
            Arc::clone(&cache),
            Arc::clone(&resolver),
            self.codec.clone(),
            Arc::clone(&self.surface),
            self.settings.reading_mode,
            self.settings.overscan,
            self.settings.history_size,
        );

        Ok(OpenDocument {
            title: payload.book.title,
            session,
            chapters,
            cache,
            resolver,
            controller,
        })
    }
}
