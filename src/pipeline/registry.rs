//! Converter registry: route a type key to the converter that handles it.
//!
//! ## Lookup
//!
//! ```text
//! raw key ──normalise──▶ ConverterKey? ──validate──▶ registered? ──▶ convert
//!                             │ no                        │ no
//!                             ▼                           ▼
//!                       media fallback ──validate──▶ Video converter? ──▶ convert
//!                             │ no                        │ no
//!                             ▼                           ▼
//!                       UnsupportedType             UnsupportedType
//! ```
//!
//! The table is keyed by the closed [`ConverterKey`] enum. Raw audio and video
//! extensions are not keys of their own; they reach the video-capable
//! converter through the explicit second stage ([`fallback_key`]).
//!
//! The registry is filled once at start-up and shared read-only behind an
//! `Arc` afterwards.

use crate::config::ConversionOptions;
use crate::error::{ConverterError, ItemError};
use crate::output::{ImageAsset, PageContent};
use crate::pipeline::classify::is_media_extension;
use crate::pipeline::validate::validate_input;
use crate::request::{Credential, RequestContent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Canonical converter keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterKey {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Csv,
    Json,
    Xml,
    Yaml,
    Html,
    Text,
    Markdown,
    /// Raw audio/video and video-platform links.
    Video,
    Url,
    ParentUrl,
}

impl ConverterKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConverterKey::Pdf => "pdf",
            ConverterKey::Docx => "docx",
            ConverterKey::Pptx => "pptx",
            ConverterKey::Xlsx => "xlsx",
            ConverterKey::Csv => "csv",
            ConverterKey::Json => "json",
            ConverterKey::Xml => "xml",
            ConverterKey::Yaml => "yaml",
            ConverterKey::Html => "html",
            ConverterKey::Text => "txt",
            ConverterKey::Markdown => "md",
            ConverterKey::Video => "video",
            ConverterKey::Url => "url",
            ConverterKey::ParentUrl => "parenturl",
        }
    }

    /// Parse an already-normalised key (see [`normalize_key`]).
    pub fn parse(normalized: &str) -> Option<Self> {
        let key = match normalized {
            "pdf" => ConverterKey::Pdf,
            "docx" => ConverterKey::Docx,
            "pptx" => ConverterKey::Pptx,
            "xlsx" | "xls" => ConverterKey::Xlsx,
            "csv" | "tsv" => ConverterKey::Csv,
            "json" | "jsonl" => ConverterKey::Json,
            "xml" => ConverterKey::Xml,
            "yaml" | "yml" => ConverterKey::Yaml,
            "html" | "htm" | "xhtml" => ConverterKey::Html,
            "txt" | "text" => ConverterKey::Text,
            "md" | "markdown" => ConverterKey::Markdown,
            "video" | "videolink" | "youtube" => ConverterKey::Video,
            "url" | "webpage" => ConverterKey::Url,
            "parenturl" | "crawl" => ConverterKey::ParentUrl,
            _ => return None,
        };
        Some(key)
    }
}

impl fmt::Display for ConverterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical lowercase form of a raw type key: `" .Parent-URL "` → `"parenturl"`.
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Second lookup stage for keys without a converter of their own.
pub fn fallback_key(normalized: &str) -> Option<ConverterKey> {
    is_media_extension(normalized).then_some(ConverterKey::Video)
}

// ── Converter contract ───────────────────────────────────────────────────

/// What a converter produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverterOutput {
    /// Markdown for the item (for crawls: the root page).
    pub content: String,
    /// Embedded visual assets, in order.
    pub images: Vec<ImageAsset>,
    /// Additional pages of a multi-page crawl.
    pub pages: Vec<PageContent>,
}

impl ConverterOutput {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAsset>) -> Self {
        self.images = images;
        self
    }

    pub fn with_pages(mut self, pages: Vec<PageContent>) -> Self {
        self.pages = pages;
        self
    }
}

/// Everything a converter may need besides the content itself.
#[derive(Debug, Clone)]
pub struct ConverterContext {
    pub name: String,
    pub credential: Option<Credential>,
    pub options: ConversionOptions,
    /// Cancelled when the batch is aborted; long calls should watch it.
    pub cancel: CancellationToken,
}

impl ConverterContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: None,
            options: ConversionOptions::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// A format-specific transformer.
///
/// Implementations raise [`ConverterError`] with a human-readable message;
/// the orchestrator turns it into a failed result. Timeouts are enforced by
/// the orchestrator, so converters need not implement their own.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError>;
}

/// Adapter so plain async closures can be registered.
pub struct FnConverter<F>(F);

/// Wrap an async closure as a [`Converter`].
///
/// ```rust
/// use edgequake_batch2md::pipeline::registry::{from_fn, ConverterKey, ConverterOutput, ConverterRegistry};
/// use edgequake_batch2md::ConverterError;
/// use std::sync::Arc;
///
/// let mut registry = ConverterRegistry::new();
/// registry.register(
///     ConverterKey::Html,
///     Arc::new(from_fn(|_content, ctx| async move {
///         Ok::<_, ConverterError>(ConverterOutput::markdown(format!("# {}", ctx.name)))
///     })),
/// );
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnConverter<F>
where
    F: Fn(RequestContent, ConverterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConverterOutput, ConverterError>> + Send + 'static,
{
    FnConverter(f)
}

#[async_trait]
impl<F, Fut> Converter for FnConverter<F>
where
    F: Fn(RequestContent, ConverterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConverterOutput, ConverterError>> + Send + 'static,
{
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError> {
        (self.0)(content.clone(), ctx.clone()).await
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Key → converter table.
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<ConverterKey, Arc<dyn Converter>>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.converters.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        f.debug_struct("ConverterRegistry").field("keys", &keys).finish()
    }
}

impl ConverterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the converters that need no external service:
    /// text, markdown, JSON and CSV.
    pub fn with_builtins() -> Self {
        use crate::converters::{CsvConverter, JsonConverter, TextConverter};

        let mut registry = Self::new();
        let text: Arc<dyn Converter> = Arc::new(TextConverter);
        registry.register(ConverterKey::Text, Arc::clone(&text));
        registry.register(ConverterKey::Markdown, text);
        registry.register(ConverterKey::Json, Arc::new(JsonConverter));
        registry.register(ConverterKey::Csv, Arc::new(CsvConverter));
        registry
    }

    /// Map `key` to `converter`, replacing any previous mapping.
    pub fn register(&mut self, key: ConverterKey, converter: Arc<dyn Converter>) -> &mut Self {
        if self.converters.insert(key, converter).is_some() {
            debug!("Replaced converter for '{}'", key);
        }
        self
    }

    pub fn contains(&self, key: ConverterKey) -> bool {
        self.converters.contains_key(&key)
    }

    /// Validate `content` and run the converter for `type_key`.
    ///
    /// # Errors
    /// - [`ItemError::InvalidInputShape`] / [`ItemError::EncryptedContainer`]
    ///   when validation fails (the converter is not called)
    /// - [`ItemError::UnsupportedType`] when neither stage finds a converter
    /// - [`ItemError::ConversionFailed`] when the converter raises
    pub async fn dispatch(
        &self,
        type_key: &str,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ItemError> {
        let normalized = normalize_key(type_key);

        let stages = [ConverterKey::parse(&normalized), fallback_key(&normalized)];
        for key in stages.into_iter().flatten() {
            validate_input(key, content, &ctx.name)?;
            if let Some(converter) = self.converters.get(&key) {
                debug!("Dispatching '{}' ({}) to '{}' converter", ctx.name, normalized, key);
                return converter.convert(content, ctx).await.map_err(ItemError::from);
            }
        }

        Err(ItemError::UnsupportedType {
            type_key: if normalized.is_empty() {
                "(none)".to_string()
            } else {
                normalized
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str);

    #[async_trait]
    impl Converter for Fixed {
        async fn convert(
            &self,
            _content: &RequestContent,
            _ctx: &ConverterContext,
        ) -> Result<ConverterOutput, ConverterError> {
            Ok(ConverterOutput::markdown(self.0))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Converter for Counting {
        async fn convert(
            &self,
            _content: &RequestContent,
            _ctx: &ConverterContext,
        ) -> Result<ConverterOutput, ConverterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ConverterOutput::default())
        }
    }

    fn ctx() -> ConverterContext {
        ConverterContext::new("item")
    }

    #[test]
    fn normalises_keys() {
        assert_eq!(normalize_key(" .PDF "), "pdf");
        assert_eq!(normalize_key("Parent-URL"), "parenturl");
        assert_eq!(normalize_key("video_link"), "videolink");
    }

    #[test]
    fn media_extensions_fall_back_to_video() {
        assert_eq!(ConverterKey::parse("mp3"), None);
        assert_eq!(fallback_key("mp3"), Some(ConverterKey::Video));
        assert_eq!(fallback_key("exe"), None);
    }

    #[tokio::test]
    async fn dispatch_uses_normalised_key() {
        let mut registry = ConverterRegistry::new();
        registry.register(ConverterKey::Pdf, Arc::new(Fixed("pdf!")));
        let out = registry
            .dispatch("PDF", &RequestContent::Binary(b"%PDF".to_vec()), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, "pdf!");
    }

    #[tokio::test]
    async fn register_is_last_write_wins() {
        let mut registry = ConverterRegistry::new();
        registry.register(ConverterKey::Text, Arc::new(Fixed("first")));
        registry.register(ConverterKey::Text, Arc::new(Fixed("second")));
        let out = registry
            .dispatch("txt", &RequestContent::Text("x".into()), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, "second");
    }

    #[tokio::test]
    async fn raw_media_routes_to_video_converter() {
        let mut registry = ConverterRegistry::new();
        registry.register(ConverterKey::Video, Arc::new(Fixed("transcript")));
        let out = registry
            .dispatch("wav", &RequestContent::Binary(vec![1, 2, 3]), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, "transcript");
    }

    #[tokio::test]
    async fn unknown_key_is_unsupported() {
        let registry = ConverterRegistry::with_builtins();
        let err = registry
            .dispatch("exe", &RequestContent::Binary(vec![0x4d, 0x5a]), &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ItemError::UnsupportedType {
                type_key: "exe".into()
            }
        );
    }

    #[tokio::test]
    async fn known_key_without_converter_is_unsupported() {
        let registry = ConverterRegistry::new();
        let err = registry
            .dispatch("pdf", &RequestContent::Binary(b"%PDF".to_vec()), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn invalid_shape_never_reaches_converter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ConverterRegistry::new();
        registry.register(ConverterKey::Pdf, Arc::new(Counting(Arc::clone(&calls))));
        let err = registry
            .dispatch("pdf", &RequestContent::Text("not bytes".into()), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::InvalidInputShape { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn converter_error_becomes_conversion_failed() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            ConverterKey::Html,
            Arc::new(from_fn(|_content, _ctx| async move {
                Err::<ConverterOutput, _>(ConverterError::new("malformed markup"))
            })),
        );
        let err = registry
            .dispatch("html", &RequestContent::Text("<p".into()), &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ItemError::ConversionFailed {
                detail: "malformed markup".into()
            }
        );
    }
}
