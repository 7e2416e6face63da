//! Core document types shared by every reading component

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Printed page number as delivered by the backend.
///
/// Rich-text sources sometimes label pages with non-numeric markers
/// (`"220a"`, roman numerals for front matter), so both shapes are kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageNumber {
    Number(u32),
    Label(String),
}

impl PageNumber {
    /// Numeric value, parsing labels that are plain integers
    #[must_use]
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Label(label) => label.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// A structured content block of a block-format page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    #[serde(alias = "header")]
    Heading {
        #[serde(alias = "content")]
        text: String,
        #[serde(default)]
        level: u32,
    },
    Paragraph {
        #[serde(alias = "content")]
        text: String,
    },
    Verse {
        #[serde(alias = "content")]
        lines: Vec<String>,
    },
    Footnote {
        #[serde(alias = "content")]
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// One renderable page of a document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Page {
    /// Single opaque HTML fragment
    #[serde(rename = "richtext")]
    RichText {
        html: String,
        volume: Option<String>,
        page_number: Option<PageNumber>,
    },
    /// Ordered structured blocks
    Block {
        blocks: Vec<Block>,
        page_number: Option<u32>,
    },
    /// No inline content; rendered by the PDF viewer at `frame_index`
    Pdf { frame_index: usize },
}

impl Page {
    /// Empty page of `source`, standing in for one that could not be read
    #[must_use]
    pub fn blank(source: SourceKind, render_index: usize) -> Self {
        match source {
            SourceKind::RichText => Self::RichText {
                html: String::new(),
                volume: None,
                page_number: None,
            },
            SourceKind::Block => Self::Block {
                blocks: Vec::new(),
                page_number: None,
            },
            SourceKind::Pdf => Self::Pdf {
                frame_index: render_index,
            },
        }
    }

    #[must_use]
    pub fn source(&self) -> SourceKind {
        match self {
            Self::RichText { .. } => SourceKind::RichText,
            Self::Block { .. } => SourceKind::Block,
            Self::Pdf { .. } => SourceKind::Pdf,
        }
    }

    /// Whether this page carries the printed page `page` (in `volume`, when given).
    ///
    /// Block and PDF sources have no volumes, so `volume` is ignored for them.
    #[must_use]
    pub fn matches(&self, page: u32, volume: Option<&str>) -> bool {
        match self {
            Self::RichText {
                volume: own_volume,
                page_number,
                ..
            } => {
                let page_matches = page_number.as_ref().and_then(PageNumber::as_number) == Some(page);
                let volume_matches = match volume {
                    Some(wanted) => own_volume.as_deref() == Some(wanted),
                    None => true,
                };
                page_matches && volume_matches
            }
            Self::Block { page_number, .. } => *page_number == Some(page),
            Self::Pdf { frame_index } => frame_index + 1 == page as usize,
        }
    }

    /// Human page label, e.g. `v. 3, p. 220`.
    ///
    /// Falls back to the 1-based render position when the page carries no number.
    #[must_use]
    pub fn label(&self, render_index: usize) -> String {
        match self {
            Self::RichText {
                volume: Some(volume),
                page_number: Some(number),
                ..
            } => format!("v. {volume}, p. {number}"),
            Self::RichText {
                page_number: Some(number),
                ..
            } => format!("p. {number}"),
            Self::Block {
                page_number: Some(number),
                ..
            } => format!("p. {number}"),
            _ => format!("p. {}", render_index + 1),
        }
    }
}

/// The closed set of content formats a document can be served in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[serde(rename = "richtext")]
    RichText,
    Block,
    Pdf,
}

impl SourceKind {
    /// Map a backend source tag onto a known format
    #[must_use]
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "richtext" | "turath" => Some(Self::RichText),
            "block" | "openiti" => Some(Self::Block),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RichText => "richtext",
            Self::Block => "block",
            Self::Pdf => "pdf",
        }
    }
}

/// A semantic reference to a position in a document
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageLocator {
    /// Printed page, optionally scoped to a volume
    Page { page: u32, volume: Option<String> },
    /// Index into the document's flat heading list
    Chapter { chapter_index: usize },
    /// Already resolved
    Render { render_index: usize },
}

impl PageLocator {
    pub fn page(page: u32, volume: Option<&str>) -> Self {
        Self::Page {
            page,
            volume: volume.map(str::to_string),
        }
    }

    pub fn chapter(chapter_index: usize) -> Self {
        Self::Chapter { chapter_index }
    }

    pub fn render(render_index: usize) -> Self {
        Self::Render { render_index }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub title: String,
    /// Hierarchy depth, 0 is top level
    pub level: u32,
    pub locator: Option<PageLocator>,
    pub render_index: Option<usize>,
}

impl Heading {
    pub fn new(title: impl Into<String>, level: u32) -> Self {
        Self {
            title: title.into(),
            level,
            locator: None,
            render_index: None,
        }
    }

    #[must_use]
    pub fn with_locator(mut self, locator: PageLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    #[must_use]
    pub fn with_render_index(mut self, render_index: usize) -> Self {
        self.render_index = Some(render_index);
        self
    }
}

/// A hit returned by the external full-text search service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub volume: Option<String>,
    #[serde(default)]
    pub render_index: Option<usize>,
}

impl SearchHit {
    /// The most specific locator this hit carries
    #[must_use]
    pub fn locator(&self) -> Option<PageLocator> {
        if let Some(render_index) = self.render_index {
            return Some(PageLocator::render(render_index));
        }
        self.page.map(|page| PageLocator::Page {
            page,
            volume: self.volume.clone(),
        })
    }
}

/// Accept `"3"` and `3` alike for identifiers the backend is inconsistent about
pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(Raw::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
