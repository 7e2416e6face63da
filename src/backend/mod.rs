//! Backend document contract: requests, wire responses and the backend trait

mod corpus;

use std::future::Future;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::model::opt_string_or_number;
use crate::session::SlugRegistry;

pub use corpus::JsonCorpusBackend;

/// Errors from backend fetches
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport: {detail}")]
    Transport { detail: String },

    #[error("document {document_id} not found")]
    NotFound { document_id: String },

    #[error("{requested} redirected to {primary}, which redirected again to {next}")]
    RedirectLoop {
        requested: String,
        primary: String,
        next: String,
    },

    #[error("malformed response: {detail}")]
    Malformed { detail: String },
}

impl FetchError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport { detail: msg.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed { detail: msg.into() }
    }

    /// Whether retrying the same request later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// `GET /document/{id}` parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    #[serde(skip)]
    pub document_id: String,
    pub start_index: usize,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl ChunkRequest {
    pub fn new(document_id: &str, version_id: Option<&str>, start_index: usize, size: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            start_index,
            size,
            version_id: version_id.map(str::to_string),
            locale: None,
            fields: Vec::new(),
        }
    }

    /// Same request addressed to another document id
    #[must_use]
    pub fn retarget(&self, document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            ..self.clone()
        }
    }
}

/// `GET /document/page-index/{id}` parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageIndexRequest {
    #[serde(skip)]
    pub document_id: String,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageIndexResponse {
    pub index: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectKind {
    #[serde(rename = "alternate-slug")]
    AlternateSlug,
}

/// "This id is not canonical, use `primary_slug` instead"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternateSlug {
    #[serde(rename = "type")]
    pub kind: RedirectKind,
    pub primary_slug: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Heading as the backend ships it, before normalization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHeading {
    pub title: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, alias = "vol", deserialize_with = "opt_string_or_number")]
    pub volume: Option<String>,
    /// Render index hint, when the source knows it
    #[serde(default)]
    pub page_index: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub source: Option<String>,
    /// Page payloads; their shape depends on `source`
    #[serde(default)]
    pub pages: Vec<serde_json::Value>,
    #[serde(default)]
    pub headings: Vec<RawHeading>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub size: usize,
}

/// A normal page-chunk response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    #[serde(default)]
    pub book: BookInfo,
    #[serde(default)]
    pub content: RawContent,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentResponse {
    Redirect(AlternateSlug),
    Content(DocumentPayload),
}

/// The network contract the reading engine consumes
pub trait DocumentBackend: Send + Sync {
    fn fetch_document(
        &self,
        request: &ChunkRequest,
    ) -> impl Future<Output = Result<DocumentResponse, FetchError>> + Send;

    fn lookup_page_index(
        &self,
        request: &PageIndexRequest,
    ) -> impl Future<Output = Result<PageIndexResponse, FetchError>> + Send;
}

/// Fetch a chunk, following at most one canonical-slug redirect.
///
/// Requests for an id with a known canonical slug go straight to that slug.
/// A redirect response records the mapping in `slugs` and retries once; a
/// second redirect is a [`FetchError::RedirectLoop`].
pub async fn fetch_canonical<B: DocumentBackend>(
    backend: &B,
    slugs: &SlugRegistry,
    request: &ChunkRequest,
) -> Result<DocumentPayload, FetchError> {
    let requested = request.document_id.as_str();
    let target = slugs.canonical(requested);
    let request = if target != requested {
        debug!("Using canonical slug {target} for {requested}");
        request.retarget(&target)
    } else {
        request.clone()
    };

    match backend.fetch_document(&request).await? {
        DocumentResponse::Content(payload) => Ok(payload),
        DocumentResponse::Redirect(redirect) => {
            let primary = redirect.primary_slug;
            info!("Document {target} is an alternate slug of {primary}");
            slugs.record(requested, &primary);
            if target != requested {
                slugs.record(&target, &primary);
            }

            match backend.fetch_document(&request.retarget(&primary)).await? {
                DocumentResponse::Content(payload) => Ok(payload),
                DocumentResponse::Redirect(next) => Err(FetchError::RedirectLoop {
                    requested: requested.to_string(),
                    primary,
                    next: next.primary_slug,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_marker_parses_before_content() {
        let response: DocumentResponse =
            serde_json::from_str(r#"{"type": "alternate-slug", "primarySlug": "new-id"}"#).unwrap();
        assert_eq!(
            response,
            DocumentResponse::Redirect(AlternateSlug {
                kind: RedirectKind::AlternateSlug,
                primary_slug: "new-id".to_string(),
            })
        );
    }

    #[test]
    fn content_response_parses() {
        let response: DocumentResponse = serde_json::from_str(
            r#"{
                "book": {"slug": "kitab"},
                "content": {
                    "source": "turath",
                    "pages": [{"text": "<p>a</p>", "vol": "1", "page": 1}],
                    "headings": [{"title": "Intro", "level": 1, "page": 1, "vol": 1}]
                },
                "pagination": {"total": 120, "size": 10}
            }"#,
        )
        .unwrap();

        let DocumentResponse::Content(payload) = response else {
            panic!("expected content");
        };
        assert_eq!(payload.book.slug.as_deref(), Some("kitab"));
        assert_eq!(payload.content.pages.len(), 1);
        assert_eq!(payload.content.headings[0].volume.as_deref(), Some("1"));
        assert_eq!(payload.pagination, Some(Pagination { total: 120, size: 10 }));
    }

    #[test]
    fn chunk_request_serializes_query_params() {
        let mut request = ChunkRequest::new("kitab", Some("v2"), 20, 10);
        request.fields.push("headings".to_string());
        let query = serde_json::to_value(&request).unwrap();
        assert_eq!(
            query,
            serde_json::json!({
                "startIndex": 20,
                "size": 10,
                "versionId": "v2",
                "fields": ["headings"],
            })
        );
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(FetchError::transport("reset").is_retryable());
        assert!(
            !FetchError::NotFound {
                document_id: "x".to_string()
            }
            .is_retryable()
        );
    }
}
