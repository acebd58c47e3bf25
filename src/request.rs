//! Request-side data model.
//!
//! A [`ConversionRequest`] is built once at the batch boundary
//! ([`crate::pipeline::input`]) and only read afterwards. It owns its content
//! so requests can be moved into concurrently running item futures without
//! borrowing from the caller.

use crate::config::ConversionOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What a request points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    /// An uploaded or local file.
    File,
    /// A single web page.
    Url,
    /// A site crawl starting at a parent URL.
    ParentUrl,
    /// A link to a video platform.
    VideoLink,
}

impl ItemKind {
    /// Kebab-case name used on the wire, in logs and in `summary.md`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Url => "url",
            ItemKind::ParentUrl => "parent-url",
            ItemKind::VideoLink => "video-link",
        }
    }

    /// True for the kinds whose content is a web address.
    pub fn is_web(&self) -> bool {
        !matches!(self, ItemKind::File)
    }

    /// Raw type key handed to the registry.
    ///
    /// Files dispatch on their extension; the other kinds dispatch on the
    /// kind itself. The registry normalises the key before lookup.
    pub fn type_key(&self, name: &str) -> String {
        match self {
            ItemKind::File => extension(name).unwrap_or_default(),
            ItemKind::Url => "url".to_string(),
            ItemKind::ParentUrl => "parent-url".to_string(),
            ItemKind::VideoLink => "video".to_string(),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "file" => Ok(ItemKind::File),
            "url" => Ok(ItemKind::Url),
            "parent-url" | "parenturl" => Ok(ItemKind::ParentUrl),
            "video-link" | "videolink" | "video" | "youtube" => Ok(ItemKind::VideoLink),
            other => Err(format!("unknown item kind '{other}'")),
        }
    }
}

/// Lower-cased extension of a file name, without the dot.
///
/// `None` when the name has no extension (or is a dotfile like `.env`).
pub fn extension(name: &str) -> Option<String> {
    Path::new(name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// The payload of a request.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum RequestContent {
    /// Raw bytes (uploads, fetched remote files, raw media).
    Binary(Vec<u8>),
    /// Plain text (URLs, pasted text).
    Text(String),
    /// A descriptor object (e.g. `{"url": "...", "title": "..."}`).
    Structured(serde_json::Value),
    /// An http(s) file reference, fetched as part of the item's own
    /// conversion so it shares the item's timeout and cancellation.
    Remote(String),
}

impl RequestContent {
    /// Name of the runtime shape, used in `InvalidInputShape` messages.
    pub fn shape_name(&self) -> &'static str {
        match self {
            RequestContent::Binary(_) => "binary",
            RequestContent::Text(_) => "text",
            RequestContent::Structured(_) => "structured",
            RequestContent::Remote(_) => "remote",
        }
    }

    /// Content as UTF-8 text, if it is text or valid UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestContent::Text(s) => Some(s),
            RequestContent::Binary(b) => std::str::from_utf8(b).ok(),
            RequestContent::Structured(_) | RequestContent::Remote(_) => None,
        }
    }

    /// The web address carried by the content: the text itself or a
    /// descriptor's `url` field.
    pub fn url(&self) -> Option<&str> {
        match self {
            RequestContent::Text(s) => Some(s.trim()),
            RequestContent::Structured(v) => v.get("url").and_then(|u| u.as_str()),
            RequestContent::Binary(_) | RequestContent::Remote(_) => None,
        }
    }
}

impl fmt::Debug for RequestContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestContent::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            RequestContent::Text(s) => write!(f, "Text({} chars)", s.chars().count()),
            RequestContent::Structured(v) => write!(f, "Structured({v})"),
            RequestContent::Remote(url) => write!(f, "Remote({url})"),
        }
    }
}

/// A caller-supplied secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret itself, for handing to a service client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Blank secrets count as "not supplied".
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One unit of input plus the metadata needed to convert it.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub kind: ItemKind,
    pub content: RequestContent,
    /// Display or file name, not yet sanitised.
    pub name: String,
    pub options: ConversionOptions,
    pub credential: Option<Credential>,
}

impl ConversionRequest {
    pub fn new(kind: ItemKind, name: impl Into<String>, content: RequestContent) -> Self {
        Self {
            kind,
            content,
            name: name.into(),
            options: ConversionOptions::default(),
            credential: None,
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Extension of the request name, used by the classifier.
    pub fn extension(&self) -> Option<String> {
        extension(&self.name)
    }

    /// The usable credential, ignoring blank ones.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref().filter(|c| !c.is_blank())
    }

    /// Source address for url and parent-url requests.
    pub fn source_url(&self) -> Option<String> {
        match self.kind {
            ItemKind::Url | ItemKind::ParentUrl => self.content.url().map(str::to_string),
            ItemKind::File | ItemKind::VideoLink => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension("Report.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("README"), None);
        assert_eq!(extension(".env"), None);
    }

    #[test]
    fn kind_parses_wire_names() {
        assert_eq!("parent-url".parse::<ItemKind>().unwrap(), ItemKind::ParentUrl);
        assert_eq!("Video_Link".parse::<ItemKind>().unwrap(), ItemKind::VideoLink);
        assert!("folder".parse::<ItemKind>().is_err());
    }

    #[test]
    fn type_key_uses_extension_for_files() {
        assert_eq!(ItemKind::File.type_key("deck.PPTX"), "pptx");
        assert_eq!(ItemKind::File.type_key("noext"), "");
        assert_eq!(ItemKind::Url.type_key("whatever.pdf"), "url");
        assert_eq!(ItemKind::VideoLink.type_key("clip"), "video");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("sk-secret");
        assert!(!format!("{c:?}").contains("sk-secret"));
    }

    #[test]
    fn blank_credential_is_ignored() {
        let req = ConversionRequest::new(ItemKind::File, "a.mp3", RequestContent::Binary(vec![1]))
            .with_credential(Credential::new("   "));
        assert!(req.credential().is_none());
    }

    #[test]
    fn source_url_only_for_page_kinds() {
        let page = ConversionRequest::new(
            ItemKind::Url,
            "Example",
            RequestContent::Text(" https://example.com/a ".into()),
        );
        assert_eq!(page.source_url().as_deref(), Some("https://example.com/a"));

        let video = ConversionRequest::new(
            ItemKind::VideoLink,
            "clip",
            RequestContent::Text("https://video.example/watch?v=1".into()),
        );
        assert!(video.source_url().is_none());

        let crawl = ConversionRequest::new(
            ItemKind::ParentUrl,
            "docs",
            RequestContent::Structured(serde_json::json!({ "url": "https://docs.example.org" })),
        );
        assert_eq!(crawl.source_url().as_deref(), Some("https://docs.example.org"));
    }
}
