pub mod test_helpers {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use serde_json::{Value, json};
    use tokio::sync::Semaphore;

    use crate::backend::{
        AlternateSlug, BookInfo, ChunkRequest, DocumentBackend, DocumentPayload, DocumentResponse,
        FetchError, PageIndexRequest, PageIndexResponse, Pagination, RawContent, RawHeading,
        RedirectKind,
    };
    use crate::controller::{ScrollCommand, ScrollSurface};
    use crate::normalizer::DocumentKind;
    use crate::session::{DocumentSession, SlugRegistry};

    type DocumentKey = (String, Option<String>);

    #[derive(Clone, Debug)]
    struct ScriptedDocument {
        source: String,
        pages: Vec<Value>,
        headings: Vec<RawHeading>,
    }

    /// In-memory backend driven entirely by the test.
    ///
    /// Records every call, can fail the next N fetches or lookups and, when built with
    /// [`ScriptedBackend::gated`], holds every call until [`ScriptedBackend::release`]
    /// opens the gate.
    #[derive(Default)]
    pub struct ScriptedBackend {
        documents: Mutex<HashMap<DocumentKey, ScriptedDocument>>,
        redirects: Mutex<HashMap<String, String>>,
        page_indices: Mutex<HashMap<(String, u32, Option<String>), Option<usize>>>,
        failures: Mutex<VecDeque<FetchError>>,
        lookup_failures: Mutex<VecDeque<FetchError>>,
        gate: Option<Semaphore>,
        fetches: Mutex<Vec<ChunkRequest>>,
        lookups: Mutex<Vec<PageIndexRequest>>,
        calls_started: AtomicUsize,
    }

    /// `count` rich-text pages in volume "1", printed pages 1..=count
    pub fn rich_text_pages(count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| json!({"text": format!("<p>page {}</p>", i + 1), "vol": "1", "page": i + 1}))
            .collect()
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call waits for [`release`](Self::release) before answering
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        /// Open the gate; the single permit is passed from call to call
        pub fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }

        pub fn with_document(
            self,
            document_id: &str,
            version_id: Option<&str>,
            source: &str,
            pages: Vec<Value>,
        ) -> Self {
            self.lock_documents().insert(
                (document_id.to_string(), version_id.map(str::to_string)),
                ScriptedDocument {
                    source: source.to_string(),
                    pages,
                    headings: Vec::new(),
                },
            );
            self
        }

        /// Rich-text document with `count` generated pages
        pub fn with_rich_text(self, document_id: &str, count: usize) -> Self {
            self.with_document(document_id, None, "turath", rich_text_pages(count))
        }

        pub fn with_headings(self, document_id: &str, headings: Vec<RawHeading>) -> Self {
            for ((id, _), document) in self.lock_documents().iter_mut() {
                if id == document_id {
                    document.headings = headings.clone();
                }
            }
            self
        }

        pub fn with_redirect(self, from: &str, to: &str) -> Self {
            lock(&self.redirects).insert(from.to_string(), to.to_string());
            self
        }

        pub fn with_page_index(
            self,
            document_id: &str,
            page: u32,
            volume: Option<&str>,
            index: Option<usize>,
        ) -> Self {
            lock(&self.page_indices).insert(
                (document_id.to_string(), page, volume.map(str::to_string)),
                index,
            );
            self
        }

        /// Fail the next `count` document fetches with `error`
        pub fn fail_next_fetches(&self, count: usize, error: FetchError) {
            let mut failures = lock(&self.failures);
            for _ in 0..count {
                failures.push_back(error.clone());
            }
        }

        /// Fail the next `count` page-index lookups with `error`
        pub fn fail_next_lookups(&self, count: usize, error: FetchError) {
            lock(&self.lookup_failures).extend(std::iter::repeat_n(error, count));
        }

        pub fn fetch_count(&self) -> usize {
            lock(&self.fetches).len()
        }

        /// Document ids of every fetch, in call order
        pub fn fetched_ids(&self) -> Vec<String> {
            lock(&self.fetches)
                .iter()
                .map(|r| r.document_id.clone())
                .collect()
        }

        pub fn fetch_requests(&self) -> Vec<ChunkRequest> {
            lock(&self.fetches).clone()
        }

        pub fn lookup_count(&self) -> usize {
            lock(&self.lookups).len()
        }

        pub fn lookup_requests(&self) -> Vec<PageIndexRequest> {
            lock(&self.lookups).clone()
        }

        /// Calls that have reached the backend, answered or still waiting at the gate
        pub fn calls_started(&self) -> usize {
            self.calls_started.load(Ordering::SeqCst)
        }

        fn lock_documents(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentKey, ScriptedDocument>> {
            lock(&self.documents)
        }

        async fn pass_gate(&self) {
            self.calls_started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                // Dropping the permit passes it to the next waiter
                let _permit = gate.acquire().await;
            }
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl DocumentBackend for ScriptedBackend {
        async fn fetch_document(&self, request: &ChunkRequest) -> Result<DocumentResponse, FetchError> {
            lock(&self.fetches).push(request.clone());
            self.pass_gate().await;

            if let Some(error) = lock(&self.failures).pop_front() {
                return Err(error);
            }
            if let Some(primary) = lock(&self.redirects).get(&request.document_id).cloned() {
                return Ok(DocumentResponse::Redirect(AlternateSlug {
                    kind: RedirectKind::AlternateSlug,
                    primary_slug: primary,
                }));
            }

            let key = (request.document_id.clone(), request.version_id.clone());
            let document = self
                .lock_documents()
                .get(&key)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    document_id: request.document_id.clone(),
                })?;

            let total = document.pages.len();
            let start = request.start_index.min(total);
            let end = start.saturating_add(request.size).min(total);
            Ok(DocumentResponse::Content(DocumentPayload {
                book: BookInfo {
                    id: Some(request.document_id.clone()),
                    slug: Some(request.document_id.clone()),
                    title: Some(format!("Title of {}", request.document_id)),
                },
                content: RawContent {
                    source: Some(document.source),
                    pages: document.pages[start..end].to_vec(),
                    headings: document.headings,
                },
                pagination: Some(Pagination {
                    total,
                    size: request.size,
                }),
            }))
        }

        async fn lookup_page_index(
            &self,
            request: &PageIndexRequest,
        ) -> Result<PageIndexResponse, FetchError> {
            lock(&self.lookups).push(request.clone());
            self.pass_gate().await;

            if let Some(error) = lock(&self.lookup_failures).pop_front() {
                return Err(error);
            }

            let key = (
                request.document_id.clone(),
                request.page,
                request.volume.clone(),
            );
            let index = lock(&self.page_indices).get(&key).copied().flatten();
            Ok(PageIndexResponse { index })
        }
    }

    /// Surface that remembers every command it was asked to execute
    #[derive(Debug, Default)]
    pub struct RecordingSurface {
        commands: Mutex<Vec<ScrollCommand>>,
    }

    impl RecordingSurface {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn commands(&self) -> Vec<ScrollCommand> {
            lock(&self.commands).clone()
        }
    }

    impl ScrollSurface for RecordingSurface {
        fn execute(&self, command: &ScrollCommand) {
            lock(&self.commands).push(command.clone());
        }
    }

    /// Rich-text session over `document_id` with the given bundled pages
    pub fn rich_text_session(
        document_id: &str,
        total: usize,
        chunk_size: usize,
        bundled: usize,
    ) -> Arc<DocumentSession> {
        let pages = crate::normalizer::normalize_pages(
            crate::model::SourceKind::RichText,
            &rich_text_pages(bundled),
            0,
        );
        Arc::new(
            DocumentSession::new(
                document_id,
                None,
                DocumentKind::RichText,
                chunk_size,
                Arc::new(SlugRegistry::new()),
            )
            .with_bundled_pages(pages)
            .with_total_render_count(total),
        )
    }
}
