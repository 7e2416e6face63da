//! Turns backend payloads of any source format into uniform pages and headings.
//!
//! This is the only place that branches on the source format. Everything
//! downstream works with [`Page`] and [`Heading`].

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{DocumentPayload, RawHeading};
use crate::model::{Block, Heading, Page, PageLocator, PageNumber, SourceKind};
use crate::model::opt_string_or_number;

/// What kind of document a payload turned out to be
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    RichText,
    Block,
    /// Pages and outline arrive from the PDF viewer, not the payload
    Pdf,
    /// Unknown or missing source; shown as an external document
    Unsupported,
}

impl From<SourceKind> for DocumentKind {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::RichText => Self::RichText,
            SourceKind::Block => Self::Block,
            SourceKind::Pdf => Self::Pdf,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedDocument {
    pub kind: DocumentKind,
    pub pages: Vec<Page>,
    pub headings: Vec<Heading>,
    pub total_count: usize,
}

impl NormalizedDocument {
    pub fn unsupported() -> Self {
        Self {
            kind: DocumentKind::Unsupported,
            pages: Vec::new(),
            headings: Vec::new(),
            total_count: 0,
        }
    }
}

/// Normalize an initial document payload.
///
/// Pages are assumed to start at render index 0, which is how initial loads
/// are requested.
pub fn normalize(raw: &DocumentPayload) -> NormalizedDocument {
    let Some(source) = raw.content.source.as_deref().and_then(SourceKind::from_wire) else {
        debug!(
            "Unsupported document source {:?}, treating as external",
            raw.content.source
        );
        return NormalizedDocument::unsupported();
    };

    if source == SourceKind::Pdf && raw.content.pages.is_empty() {
        return NormalizedDocument {
            kind: DocumentKind::Pdf,
            pages: Vec::new(),
            headings: normalize_headings(&raw.content.headings),
            total_count: 0,
        };
    }

    let pages = normalize_pages(source, &raw.content.pages, 0);
    let mut headings = normalize_headings(&raw.content.headings);
    if headings.is_empty() && source == SourceKind::Block {
        headings = headings_from_blocks(&pages, 0);
    }

    let total_count = raw
        .pagination
        .map(|p| p.total)
        .filter(|total| *total > 0)
        .unwrap_or(pages.len());

    NormalizedDocument {
        kind: source.into(),
        pages,
        headings,
        total_count,
    }
}

/// Convert raw page payloads starting at `start_index` into [`Page`]s.
///
/// A payload that doesn't parse as a `source` page becomes an empty page of
/// that source, so every later page keeps its render index.
pub fn normalize_pages(
    source: SourceKind,
    raw_pages: &[serde_json::Value],
    start_index: usize,
) -> Vec<Page> {
    let mut pages = Vec::with_capacity(raw_pages.len());
    for (offset, raw) in raw_pages.iter().enumerate() {
        let render_index = start_index + offset;
        let page = normalize_page(source, raw, render_index).unwrap_or_else(|| {
            warn!(
                "Page {render_index} is not a {} page, leaving it blank",
                source.as_str()
            );
            Page::blank(source, render_index)
        });
        pages.push(page);
    }
    pages
}

#[derive(Deserialize)]
struct RawRichTextPage {
    #[serde(alias = "text", alias = "content")]
    html: String,
    #[serde(default, alias = "vol", deserialize_with = "opt_string_or_number")]
    volume: Option<String>,
    #[serde(default, alias = "page", alias = "pageNumber")]
    page_number: Option<PageNumber>,
}

#[derive(Deserialize)]
struct RawBlockPage {
    blocks: Vec<Block>,
    #[serde(default, alias = "page", alias = "pageNumber")]
    page_number: Option<u32>,
}

fn normalize_page(source: SourceKind, raw: &serde_json::Value, render_index: usize) -> Option<Page> {
    match source {
        SourceKind::RichText => {
            let page = RawRichTextPage::deserialize(raw).ok()?;
            Some(Page::RichText {
                html: page.html,
                volume: page.volume,
                page_number: page.page_number,
            })
        }
        SourceKind::Block => {
            let page = RawBlockPage::deserialize(raw).ok()?;
            let blocks = page
                .blocks
                .into_iter()
                .filter(|block| *block != Block::Unknown)
                .collect();
            Some(Page::Block {
                blocks,
                page_number: page.page_number,
            })
        }
        SourceKind::Pdf => Some(Page::Pdf {
            frame_index: render_index,
        }),
    }
}

fn normalize_headings(raw: &[RawHeading]) -> Vec<Heading> {
    raw.iter()
        .filter(|h| !h.title.trim().is_empty())
        .map(|h| Heading {
            title: h.title.trim().to_string(),
            level: h.level,
            locator: h.page.map(|page| PageLocator::Page {
                page,
                volume: h.volume.clone(),
            }),
            render_index: h.page_index,
        })
        .collect()
}

/// Block sources without a heading list carry their headings inline
fn headings_from_blocks(pages: &[Page], start_index: usize) -> Vec<Heading> {
    let mut headings = Vec::new();
    for (offset, page) in pages.iter().enumerate() {
        let Page::Block { blocks, .. } = page else {
            continue;
        };
        for block in blocks {
            if let Block::Heading { text, level } = block {
                let render_index = start_index + offset;
                headings.push(
                    Heading::new(text.trim(), *level)
                        .with_locator(PageLocator::render(render_index))
                        .with_render_index(render_index),
                );
            }
        }
    }
    headings
}

/// A bookmark reported by the PDF viewer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfBookmark {
    pub title: String,
    /// 0-indexed page, absent for external links
    pub page_index: Option<usize>,
    #[serde(default)]
    pub children: Vec<PdfBookmark>,
}

impl PdfBookmark {
    pub fn new(title: impl Into<String>, page_index: usize) -> Self {
        Self {
            title: title.into(),
            page_index: Some(page_index),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<PdfBookmark>) -> Self {
        self.children = children;
        self
    }
}

/// Flatten a PDF outline into levelled headings.
///
/// Bookmarks pointing past `page_count` keep their title but stay unresolved.
pub fn normalize_pdf_outline(outline: &[PdfBookmark], page_count: usize) -> Vec<Heading> {
    let mut headings = Vec::new();
    flatten_outline(outline, 0, page_count, &mut headings);
    headings
}

fn flatten_outline(outline: &[PdfBookmark], level: u32, page_count: usize, out: &mut Vec<Heading>) {
    for bookmark in outline {
        let title = bookmark.title.trim();
        if !title.is_empty() {
            let mut heading = Heading::new(title, level);
            if let Some(page) = bookmark.page_index.filter(|p| *p < page_count) {
                heading = heading
                    .with_locator(PageLocator::render(page))
                    .with_render_index(page);
            }
            out.push(heading);
        }

        if !bookmark.children.is_empty() {
            flatten_outline(&bookmark.children, level + 1, page_count, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::{Pagination, RawContent};

    fn payload(source: Option<&str>, pages: Vec<serde_json::Value>) -> DocumentPayload {
        DocumentPayload {
            content: RawContent {
                source: source.map(str::to_string),
                pages,
                headings: Vec::new(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn unknown_source_is_unsupported_not_error() {
        let doc = normalize(&payload(Some("external"), vec![json!({"text": "x"})]));
        assert_eq!(doc, NormalizedDocument::unsupported());

        let doc = normalize(&payload(None, vec![]));
        assert_eq!(doc.kind, DocumentKind::Unsupported);
        assert_eq!(doc.total_count, 0);
    }

    #[test]
    fn rich_text_pages_normalize() {
        let mut raw = payload(
            Some("turath"),
            vec![
                json!({"text": "<p>one</p>", "vol": 1, "page": 1}),
                json!({"text": "<p>two</p>", "vol": "1", "page": "2"}),
            ],
        );
        raw.pagination = Some(Pagination { total: 500, size: 2 });
        raw.content.headings = vec![RawHeading {
            title: " Preface ".to_string(),
            level: 0,
            page: Some(2),
            volume: Some("1".to_string()),
            page_index: Some(1),
        }];

        let doc = normalize(&raw);
        assert_eq!(doc.kind, DocumentKind::RichText);
        assert_eq!(doc.total_count, 500);
        assert_eq!(
            doc.pages[1],
            Page::RichText {
                html: "<p>two</p>".to_string(),
                volume: Some("1".to_string()),
                page_number: Some(PageNumber::Label("2".to_string())),
            }
        );
        assert_eq!(doc.headings[0].title, "Preface");
        assert_eq!(doc.headings[0].render_index, Some(1));
        assert_eq!(doc.headings[0].locator, Some(PageLocator::page(2, Some("1"))));
    }

    #[test]
    fn total_falls_back_to_inline_pages() {
        let doc = normalize(&payload(Some("richtext"), vec![json!({"html": "a"})]));
        assert_eq!(doc.total_count, 1);
    }

    #[test]
    fn mismatched_pages_are_blanked() {
        let doc = normalize(&payload(
            Some("block"),
            vec![
                json!({"blocks": [{"type": "paragraph", "content": "a"}], "page": 1}),
                json!({"text": "<p>rich text in a block document</p>"}),
                json!({"blocks": [], "page": 3}),
            ],
        ));
        assert_eq!(doc.pages.len(), 3);
        assert!(doc.pages.iter().all(|p| p.source() == SourceKind::Block));
        assert_eq!(doc.pages[1], Page::blank(SourceKind::Block, 1));
        assert!(doc.pages[2].matches(3, None));
    }

    #[test]
    fn malformed_page_keeps_later_indices() {
        let raw: Vec<_> = (1..=5u32)
            .map(|n| match n {
                3 => json!({"vol": "1", "page": n}),
                _ => json!({"text": format!("<p>page {n}</p>"), "vol": "1", "page": n}),
            })
            .collect();

        let pages = normalize_pages(SourceKind::RichText, &raw, 10);
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[2], Page::blank(SourceKind::RichText, 12));
        assert!(pages[3].matches(4, Some("1")));
        assert!(pages[4].matches(5, Some("1")));
    }

    #[test]
    fn block_headings_come_from_blocks_when_absent() {
        let doc = normalize(&payload(
            Some("openiti"),
            vec![
                json!({"blocks": [{"type": "header", "content": "Book", "level": 0}]}),
                json!({"blocks": [
                    {"type": "paragraph", "content": "..."},
                    {"type": "header", "content": "Chapter", "level": 1},
                    {"type": "figure"}
                ]}),
            ],
        ));

        assert_eq!(doc.headings.len(), 2);
        assert_eq!(doc.headings[1].title, "Chapter");
        assert_eq!(doc.headings[1].render_index, Some(1));
        let Page::Block { blocks, .. } = &doc.pages[1] else {
            panic!("expected block page");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn pdf_without_pages_defers() {
        let doc = normalize(&payload(Some("pdf"), vec![]));
        assert_eq!(doc.kind, DocumentKind::Pdf);
        assert!(doc.pages.is_empty());
        assert_eq!(doc.total_count, 0);
    }

    #[test]
    fn pdf_pages_are_frame_indices() {
        let pages = normalize_pages(SourceKind::Pdf, &[json!({}), json!({})], 20);
        assert_eq!(pages, vec![Page::Pdf { frame_index: 20 }, Page::Pdf { frame_index: 21 }]);
    }

    #[test]
    fn pdf_outline_flattens_with_levels() {
        let outline = vec![
            PdfBookmark::new("Part I", 0).with_children(vec![
                PdfBookmark::new("Chapter 1", 2),
                PdfBookmark::new("  ", 3),
            ]),
            PdfBookmark::new("Index", 400),
        ];

        let headings = normalize_pdf_outline(&outline, 100);
        let titles: Vec<_> = headings.iter().map(|h| (h.title.as_str(), h.level)).collect();
        assert_eq!(titles, vec![("Part I", 0), ("Chapter 1", 1), ("Index", 0)]);
        assert_eq!(headings[1].render_index, Some(2));
        assert_eq!(headings[2].render_index, None);
    }
}
