//! Backend over a directory of JSON documents.
//!
//! Layout:
//!
//! ```text
//! corpus/
//!   redirects.json      {"old-slug": "canonical-slug", ...}   (optional)
//!   {document_id}.json  {"book": {..}, "source": "turath", "pages": [..],
//!                        "headings": [..], "versions": {"v2": {..}}}
//! ```
//!
//! Each version entry has the same `source`/`pages`/`headings` shape as the
//! top-level document, which is what an absent `versionId` reads.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use super::{
    AlternateSlug, BookInfo, ChunkRequest, DocumentBackend, DocumentPayload, DocumentResponse,
    FetchError, PageIndexRequest, PageIndexResponse, Pagination, RawContent, RedirectKind,
};
use crate::model::SourceKind;
use crate::normalizer;

const REDIRECTS_FILE: &str = "redirects.json";

#[derive(Debug, Deserialize)]
struct CorpusDocument {
    #[serde(default)]
    book: BookInfo,
    #[serde(flatten)]
    content: RawContent,
    #[serde(default)]
    versions: HashMap<String, RawContent>,
}

impl CorpusDocument {
    fn version(&self, document_id: &str, version_id: Option<&str>) -> Result<&RawContent, FetchError> {
        match version_id {
            None => Ok(&self.content),
            Some(version) => self.versions.get(version).ok_or_else(|| FetchError::NotFound {
                document_id: format!("{document_id}@{version}"),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JsonCorpusBackend {
    root: PathBuf,
}

impl JsonCorpusBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn redirects(&self) -> Result<HashMap<String, String>, FetchError> {
        let path = self.root.join(REDIRECTS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| FetchError::malformed(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(FetchError::transport(format!("{}: {e}", path.display()))),
        }
    }

    async fn document(&self, document_id: &str) -> Result<CorpusDocument, FetchError> {
        let not_found = || FetchError::NotFound {
            document_id: document_id.to_string(),
        };
        if document_id.is_empty() || document_id.contains(['/', '\\']) || document_id.starts_with('.') {
            return Err(not_found());
        }

        let path = self.root.join(format!("{document_id}.json"));
        debug!("Reading corpus document {path:?}");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(FetchError::transport(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&text).map_err(|e| FetchError::malformed(format!("{}: {e}", path.display())))
    }
}

impl DocumentBackend for JsonCorpusBackend {
    async fn fetch_document(&self, request: &ChunkRequest) -> Result<DocumentResponse, FetchError> {
        if let Some(primary) = self.redirects().await?.remove(&request.document_id) {
            return Ok(DocumentResponse::Redirect(AlternateSlug {
                kind: RedirectKind::AlternateSlug,
                primary_slug: primary,
            }));
        }

        let document = self.document(&request.document_id).await?;
        let content = document.version(&request.document_id, request.version_id.as_deref())?;

        let total = content.pages.len();
        let start = request.start_index.min(total);
        let end = start.saturating_add(request.size).min(total);
        let headings = if request.fields.iter().any(|f| f == "headings") {
            content.headings.clone()
        } else {
            Vec::new()
        };

        Ok(DocumentResponse::Content(DocumentPayload {
            book: document.book.clone(),
            content: RawContent {
                source: content.source.clone(),
                pages: content.pages[start..end].to_vec(),
                headings,
            },
            pagination: Some(Pagination {
                total,
                size: request.size,
            }),
        }))
    }

    async fn lookup_page_index(&self, request: &PageIndexRequest) -> Result<PageIndexResponse, FetchError> {
        let document = self.document(&request.document_id).await?;
        let content = document.version(&request.document_id, request.version_id.as_deref())?;
        let Some(source) = content.source.as_deref().and_then(SourceKind::from_wire) else {
            return Ok(PageIndexResponse::default());
        };

        let pages = normalizer::normalize_pages(source, &content.pages, 0);
        let mut matching = pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.matches(request.page, request.volume.as_deref()))
            .map(|(index, _)| index);

        // A page number that occurs more than once (no volume given) is ambiguous
        let index = match (matching.next(), matching.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        };
        Ok(PageIndexResponse { index })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        // Volume 1 holds pages 1-12, volume 2 restarts numbering at 1
        let pages: Vec<_> = (1..=25u32)
            .map(|n| {
                let (volume, page) = if n <= 12 { ("1", n) } else { ("2", n - 12) };
                json!({"text": format!("<p>{n}</p>"), "vol": volume, "page": page})
            })
            .collect();
        fs::write(
            dir.path().join("kitab.json"),
            json!({
                "book": {"slug": "kitab", "title": "Kitab"},
                "source": "turath",
                "pages": pages,
                "headings": [{"title": "One", "level": 1, "page": 1, "vol": "1"}],
                "versions": {
                    "v2": {"source": "openiti", "pages": [{"blocks": [], "page": 1}]}
                }
            })
            .to_string(),
        )
        .unwrap();
        fs::write(dir.path().join("redirects.json"), r#"{"old-kitab": "kitab"}"#).unwrap();
        dir
    }

    fn content(response: DocumentResponse) -> DocumentPayload {
        match response {
            DocumentResponse::Content(payload) => payload,
            DocumentResponse::Redirect(r) => panic!("unexpected redirect to {}", r.primary_slug),
        }
    }

    #[tokio::test]
    async fn chunks_are_sliced_with_total() {
        let dir = corpus();
        let backend = JsonCorpusBackend::new(dir.path());

        let payload = content(
            backend
                .fetch_document(&ChunkRequest::new("kitab", None, 20, 10))
                .await
                .unwrap(),
        );
        assert_eq!(payload.content.pages.len(), 5);
        assert_eq!(payload.pagination, Some(Pagination { total: 25, size: 10 }));
        assert!(payload.content.headings.is_empty());
        assert_eq!(payload.book.title.as_deref(), Some("Kitab"));
    }

    #[tokio::test]
    async fn headings_only_when_asked_for() {
        let dir = corpus();
        let backend = JsonCorpusBackend::new(dir.path());
        let mut request = ChunkRequest::new("kitab", None, 0, 10);
        request.fields.push("headings".to_string());

        let payload = content(backend.fetch_document(&request).await.unwrap());
        assert_eq!(payload.content.headings.len(), 1);
    }

    #[tokio::test]
    async fn redirects_and_missing_documents() {
        let dir = corpus();
        let backend = JsonCorpusBackend::new(dir.path());

        let response = backend
            .fetch_document(&ChunkRequest::new("old-kitab", None, 0, 10))
            .await
            .unwrap();
        assert!(matches!(response, DocumentResponse::Redirect(ref r) if r.primary_slug == "kitab"));

        let missing = backend
            .fetch_document(&ChunkRequest::new("nope", None, 0, 10))
            .await;
        assert!(matches!(missing, Err(FetchError::NotFound { .. })));

        let escape = backend
            .fetch_document(&ChunkRequest::new("../kitab", None, 0, 10))
            .await;
        assert!(matches!(escape, Err(FetchError::NotFound { .. })));
    }

    #[tokio::test]
    async fn versions_are_separate_content() {
        let dir = corpus();
        let backend = JsonCorpusBackend::new(dir.path());

        let payload = content(
            backend
                .fetch_document(&ChunkRequest::new("kitab", Some("v2"), 0, 10))
                .await
                .unwrap(),
        );
        assert_eq!(payload.content.source.as_deref(), Some("openiti"));
        assert_eq!(payload.pagination.map(|p| p.total), Some(1));

        let unknown = backend
            .fetch_document(&ChunkRequest::new("kitab", Some("v9"), 0, 10))
            .await;
        assert!(matches!(unknown, Err(FetchError::NotFound { .. })));
    }

    #[tokio::test]
    async fn page_lookup_needs_an_unambiguous_match() {
        let dir = corpus();
        let backend = JsonCorpusBackend::new(dir.path());
        let lookup = |page, volume: Option<&str>| PageIndexRequest {
            document_id: "kitab".to_string(),
            page,
            volume: volume.map(str::to_string),
            version_id: None,
        };

        let found = backend.lookup_page_index(&lookup(3, Some("2"))).await.unwrap();
        assert_eq!(found.index, Some(14));

        // Page 3 exists in both volumes
        let ambiguous = backend.lookup_page_index(&lookup(3, None)).await.unwrap();
        assert_eq!(ambiguous.index, None);

        let absent = backend.lookup_page_index(&lookup(99, Some("1"))).await.unwrap();
        assert_eq!(absent.index, None);
    }

    #[tokio::test]
    async fn lookup_counts_unreadable_pages() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("risala.json"),
            json!({
                "source": "turath",
                "pages": [
                    {"text": "<p>1</p>", "page": 1},
                    {"page": 2},
                    {"text": "<p>3</p>", "page": 3}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let backend = JsonCorpusBackend::new(dir.path());

        let request = PageIndexRequest {
            document_id: "risala".to_string(),
            page: 3,
            volume: None,
            version_id: None,
        };
        let found = backend.lookup_page_index(&request).await.unwrap();
        assert_eq!(found.index, Some(2));
    }
}
