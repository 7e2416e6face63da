//! Shareable deep links into a reading position

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_SHARE_BASE: &str = "https://usul.ai";

/// Path segment that precedes `{document_id}/{page}`
const TEXT_SEGMENT: &str = "t";
const TEXT_FRAGMENT_PREFIX: &str = ":~:text=";

/// Characters with meaning inside a text fragment directive
const TEXT_FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b',')
    .add(b'-')
    .add(b'<')
    .add(b'>')
    .add(b'`');

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Pdf,
    Ebook,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Pdf => "pdf",
            ViewMode::Ebook => "ebook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(ViewMode::Pdf),
            "ebook" => Some(ViewMode::Ebook),
            _ => None,
        }
    }
}

/// A position worth sharing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareAnchor {
    pub document_id: String,
    pub render_index: usize,
    pub version_id: Option<String>,
    pub view: Option<ViewMode>,
    pub tab: Option<String>,
    /// Selected text; decoration only, the link resolves without it
    pub selection: Option<String>,
}

impl ShareAnchor {
    pub fn new(document_id: impl Into<String>, render_index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            render_index,
            version_id: None,
            view: None,
            tab: None,
            selection: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version_id: Option<&str>) -> Self {
        self.version_id = version_id.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    #[must_use]
    pub fn with_view(mut self, view: ViewMode) -> Self {
        self.view = Some(view);
        self
    }

    #[must_use]
    pub fn with_tab(mut self, tab: impl Into<String>) -> Self {
        self.tab = Some(tab.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ShareBaseError {
    #[error(transparent)]
    Invalid(#[from] url::ParseError),
    #[error("{0} cannot carry a path")]
    NotABase(Url),
}

#[derive(Clone, Debug)]
pub struct ShareAnchorCodec {
    base: Url,
    default_version: Option<String>,
}

impl ShareAnchorCodec {
    /// Codec writing links under `base`, which must be able to take path segments
    pub fn new(base: Url, default_version: Option<String>) -> Result<Self, ShareBaseError> {
        if base.cannot_be_a_base() {
            return Err(ShareBaseError::NotABase(base));
        }
        Ok(Self {
            base,
            default_version,
        })
    }

    pub fn parse(base: &str, default_version: Option<String>) -> Result<Self, ShareBaseError> {
        Self::new(Url::parse(base)?, default_version)
    }

    /// `{base}/t/{document_id}/{render_index + 1}?versionId=..#:~:text=..`
    pub fn encode(&self, anchor: &ShareAnchor) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);

        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(TEXT_SEGMENT)
                .push(&anchor.document_id)
                .push(&(anchor.render_index + 1).to_string());
        }

        {
            let mut query = url.query_pairs_mut();
            if let Some(version) = anchor
                .version_id
                .as_deref()
                .filter(|v| self.default_version.as_deref() != Some(*v))
            {
                query.append_pair("versionId", version);
            }
            if let Some(view) = anchor.view {
                query.append_pair("view", view.as_str());
            }
            if let Some(tab) = &anchor.tab {
                query.append_pair("tab", tab);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        if let Some(selection) = anchor.selection.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let encoded = utf8_percent_encode(selection, TEXT_FRAGMENT).to_string();
            url.set_fragment(Some(&format!("{TEXT_FRAGMENT_PREFIX}{encoded}")));
        }

        url
    }

    /// Read an anchor back from a shared link.
    ///
    /// Returns `None` unless the path ends in `t/{document_id}/{page}` with a
    /// page number of at least 1.
    pub fn decode(&self, url: &Url) -> Option<ShareAnchor> {
        let segments: Vec<String> = url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();

        let [.., marker, document_id, page] = segments.as_slice() else {
            return None;
        };
        if marker != TEXT_SEGMENT || document_id.is_empty() {
            return None;
        }
        if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let page: usize = page.parse().ok()?;
        let render_index = page.checked_sub(1)?;

        let mut anchor = ShareAnchor::new(document_id.clone(), render_index);
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "versionId" => anchor.version_id = Some(value.into_owned()),
                "view" => anchor.view = ViewMode::parse(&value),
                "tab" => anchor.tab = Some(value.into_owned()),
                _ => {}
            }
        }

        anchor.selection = url
            .fragment()
            .and_then(|f| f.strip_prefix(TEXT_FRAGMENT_PREFIX))
            .map(|text| percent_decode_str(text).decode_utf8_lossy().into_owned())
            .filter(|text| !text.is_empty());

        Some(anchor)
    }

    /// Parse and decode a link given as text
    pub fn decode_str(&self, link: &str) -> Option<ShareAnchor> {
        self.decode(&Url::parse(link).ok()?)
    }
}

impl Default for ShareAnchorCodec {
    fn default() -> Self {
        Self::parse(DEFAULT_SHARE_BASE, None).expect("default share base is a valid url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ShareAnchorCodec {
        ShareAnchorCodec::parse("https://reader.example/en", Some("v1".to_string())).unwrap()
    }

    #[test]
    fn page_segment_is_one_based() {
        let url = codec().encode(&ShareAnchor::new("kitab-al-umm", 0));
        assert_eq!(url.as_str(), "https://reader.example/en/t/kitab-al-umm/1");
    }

    #[test]
    fn non_default_version_goes_in_query() {
        let codec = codec();
        let url = codec.encode(&ShareAnchor::new("kitab", 219).with_version(Some("v2")));
        assert_eq!(url.as_str(), "https://reader.example/en/t/kitab/220?versionId=v2");

        let url = codec.encode(&ShareAnchor::new("kitab", 219).with_version(Some("v1")));
        assert_eq!(url.as_str(), "https://reader.example/en/t/kitab/220");
    }

    #[test]
    fn view_and_tab_round_trip() {
        let codec = codec();
        let anchor = ShareAnchor::new("kitab", 4)
            .with_version(Some("v3"))
            .with_view(ViewMode::Pdf)
            .with_tab("content");
        let url = codec.encode(&anchor);
        assert_eq!(url.query(), Some("versionId=v3&view=pdf&tab=content"));
        assert_eq!(codec.decode(&url), Some(anchor));
    }

    #[test]
    fn selection_becomes_text_fragment() {
        let codec = codec();
        let url = codec.encode(&ShareAnchor::new("kitab", 9).with_selection("قال الشافعي, well-known"));
        let fragment = url.fragment().unwrap();
        assert!(fragment.starts_with(":~:text="));
        assert!(fragment.contains("%2C"));
        assert!(fragment.contains("%2D"));

        let decoded = codec.decode(&url).unwrap();
        assert_eq!(decoded.render_index, 9);
        assert_eq!(decoded.selection.as_deref(), Some("قال الشافعي, well-known"));
    }

    #[test]
    fn blank_selection_is_omitted() {
        let url = codec().encode(&ShareAnchor::new("kitab", 0).with_selection("   "));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn invalid_pages_do_not_decode() {
        let codec = codec();
        assert_eq!(codec.decode_str("https://reader.example/t/kitab/0"), None);
        assert_eq!(codec.decode_str("https://reader.example/t/kitab/abc"), None);
        assert_eq!(codec.decode_str("https://reader.example/t/kitab/+5"), None);
        assert_eq!(codec.decode_str("https://reader.example/t/kitab/-5"), None);
        assert_eq!(codec.decode_str("https://reader.example/t/kitab/5").map(|a| a.render_index), Some(4));
        assert_eq!(codec.decode_str("https://reader.example/kitab/3"), None);
        assert_eq!(codec.decode_str("not a url"), None);
    }

    #[test]
    fn ids_with_reserved_characters_survive() {
        let codec = codec();
        let anchor = ShareAnchor::new("kitab al/umm", 41);
        let url = codec.encode(&anchor);
        assert_eq!(codec.decode(&url), Some(anchor));
    }

    #[test]
    fn base_must_take_path_segments() {
        let err = ShareAnchorCodec::parse("mailto:reader@example.com", None).unwrap_err();
        assert!(matches!(err, ShareBaseError::NotABase(_)));
        assert!(matches!(
            ShareAnchorCodec::parse("not a url", None),
            Err(ShareBaseError::Invalid(_))
        ));
    }

    #[test]
    fn default_codec_uses_default_base() {
        let url = ShareAnchorCodec::default().encode(&ShareAnchor::new("x", 1));
        assert_eq!(url.as_str(), "https://usul.ai/t/x/2");
    }
}
