//! Result-side data model.
//!
//! A [`ConversionResult`] is constructed exactly once per request by the
//! orchestrator, through [`ConversionResult::succeeded`] or
//! [`ConversionResult::failed`], and has no setters. The private fields make
//! the invariants hold by construction: a failed result never carries
//! content or images, a successful one always carries content, and the name
//! is always sanitised and non-empty.

use crate::error::ItemError;
use crate::pipeline::classify::Category;
use crate::pipeline::sanitize::result_name;
use crate::request::ItemKind;
use serde::{Deserialize, Serialize};

/// An embedded binary asset referenced from a result's markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    /// Original file name, not yet sanitised.
    pub name: String,
    /// Base64 payload.
    pub data: String,
    pub mime_type: String,
    /// Where the markdown points at the image (usually a remote URL).
    /// Every literal occurrence is rewritten to the archived asset path.
    #[serde(default)]
    pub path: String,
}

impl ImageAsset {
    pub fn new(name: impl Into<String>, data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            mime_type: mime_type.into(),
            path: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// One extra page of a multi-page crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub name: String,
    pub content: String,
}

impl PageContent {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// The outcome of converting one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ItemError>,
    kind: ItemKind,
    category: Category,
    name: String,
    images: Vec<ImageAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<Vec<PageContent>>,
}

impl ConversionResult {
    /// A successful result. `source_url` is dropped for kinds other than
    /// url and parent-url; an empty `pages` list is stored as absent.
    pub fn succeeded(
        kind: ItemKind,
        category: Category,
        raw_name: &str,
        content: String,
        images: Vec<ImageAsset>,
        source_url: Option<String>,
        pages: Vec<PageContent>,
    ) -> Self {
        let source_url = match kind {
            ItemKind::Url | ItemKind::ParentUrl => source_url,
            ItemKind::File | ItemKind::VideoLink => None,
        };
        Self {
            success: true,
            content: Some(content),
            error: None,
            kind,
            category,
            name: result_name(kind, raw_name),
            images,
            source_url,
            pages: if pages.is_empty() { None } else { Some(pages) },
        }
    }

    /// A failed result: no content, no images, no pages.
    pub fn failed(kind: ItemKind, category: Category, raw_name: &str, error: ItemError) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error),
            kind,
            category,
            name: result_name(kind, raw_name),
            images: Vec::new(),
            source_url: None,
            pages: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Markdown, present iff the item succeeded.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Error, present iff the item failed.
    pub fn error(&self) -> Option<&ItemError> {
        self.error.as_ref()
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Sanitised, filesystem-safe name. Never empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn images(&self) -> &[ImageAsset] {
        &self.images
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn pages(&self) -> Option<&[PageContent]> {
        self.pages.as_deref()
    }
}

/// Aggregate statistics for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Images carried by successful results.
    pub images: usize,
    pub duration_ms: u64,
}

impl BatchStats {
    pub fn from_results(results: &[ConversionResult], duration_ms: u64) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            images: results.iter().map(|r| r.images().len()).sum(),
            duration_ms,
        }
    }
}

/// Everything a batch run produces.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// The serialised zip archive.
    pub archive: Vec<u8>,
    /// One result per request, in request order.
    pub results: Vec<ConversionResult>,
    pub stats: BatchStats,
}
