//! Category classification: `(item kind, extension) → Category`.
//!
//! The category decides only where a result lands in the archive (and
//! whether its conversion needs a credential). It is a pure function over two
//! fixed inputs, evaluated top to bottom, first match wins:
//!
//! 1. url, parent-url and video-link items are always `web`.
//! 2. The extension is looked up in the category sets in the fixed order
//!    documents → multimedia → data → web, so an extension listed in two
//!    sets (`pptx`, `xml`) resolves to the earlier one.
//! 3. Anything else is `other`.

use crate::request::ItemKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Archive folder a result is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Documents,
    Data,
    Multimedia,
    Web,
    Errors,
    Other,
}

impl Category {
    /// Folder name at the archive root.
    pub fn folder(&self) -> &'static str {
        match self {
            Category::Documents => "documents",
            Category::Data => "data",
            Category::Multimedia => "multimedia",
            Category::Web => "web",
            Category::Errors => "errors",
            Category::Other => "other",
        }
    }

    /// Categories whose converters call a credentialed external service.
    pub fn requires_credential(&self) -> bool {
        matches!(self, Category::Multimedia)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

// ── Extension sets ───────────────────────────────────────────────────────

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "odt", "odp", "rtf", "txt", "md", "markdown", "epub",
    "tex",
];

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg", "oga", "flac", "opus", "wma"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "avi", "mkv", "webm", "wmv", "flv", "mpeg", "mpg"];

/// Spreadsheet-adjacent formats include presentations, which the documents
/// set claims first.
const DATA_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "xls", "xlsx", "ods", "json", "jsonl", "xml", "yaml", "yml", "toml", "pptx",
];

const WEB_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "xml", "mhtml"];

/// Checked in this order; audio and video share one category.
const CATEGORY_PRIORITY: &[(Category, &[&[&str]])] = &[
    (Category::Documents, &[DOCUMENT_EXTENSIONS]),
    (Category::Multimedia, &[AUDIO_EXTENSIONS, VIDEO_EXTENSIONS]),
    (Category::Data, &[DATA_EXTENSIONS]),
    (Category::Web, &[WEB_EXTENSIONS]),
];

/// Category for a request, see the module docs for precedence.
pub fn classify(kind: ItemKind, extension: Option<&str>) -> Category {
    if kind.is_web() {
        return Category::Web;
    }

    let Some(ext) = extension.map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase()) else {
        return Category::Other;
    };

    CATEGORY_PRIORITY
        .iter()
        .find(|(_, sets)| sets.iter().any(|set| set.contains(&ext.as_str())))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Other)
}

/// True for raw audio and video extensions.
pub fn is_media_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
}
