//! Configuration types for batch conversion.
//!
//! Batch-wide behaviour lives in [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Per-item knobs live in [`ConversionOptions`],
//! which travels with each request and is handed to the converter. The
//! service proxy has its own [`ServiceConfig`] because it is constructed
//! independently of any batch.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a batch run.
///
/// # Example
/// ```rust
/// use edgequake_batch2md::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .concurrency(8)
///     .item_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Number of items converted at once. Default: 4.
    ///
    /// Items often end up at the same rate-limited service (transcription),
    /// so this stays low by default. Raise it for batches of local documents.
    pub concurrency: usize,

    /// Independent timeout for each item, in seconds. Default: 300.
    ///
    /// An item that exceeds it becomes a failed result; the rest of the
    /// batch carries on.
    pub item_timeout_secs: u64,

    /// Timeout for fetching a remote file reference, in seconds. The fetch
    /// also counts against `item_timeout_secs`. Default: 120.
    pub download_timeout_secs: u64,

    /// Deflate level for the archive, 0–9. Default: None (zip default).
    pub compression_level: Option<i64>,

    /// Options applied to descriptors that do not carry their own.
    pub default_options: ConversionOptions,

    /// Receives progress events while items complete.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            item_timeout_secs: 300,
            download_timeout_secs: 120,
            compression_level: None,
            default_options: ConversionOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("concurrency", &self.concurrency)
            .field("item_timeout_secs", &self.item_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("compression_level", &self.compression_level)
            .field("default_options", &self.default_options)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn item_timeout_secs(mut self, secs: u64) -> Self {
        self.config.item_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn compression_level(mut self, level: i64) -> Self {
        self.config.compression_level = Some(level);
        self
    }

    pub fn default_options(mut self, options: ConversionOptions) -> Self {
        self.config.default_options = options;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.item_timeout_secs == 0 {
            return Err(BatchError::InvalidConfig(
                "Item timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(level) = c.compression_level {
            if !(0..=9).contains(&level) {
                return Err(BatchError::InvalidConfig(format!(
                    "Compression level must be 0–9, got {level}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Per-item options ─────────────────────────────────────────────────────

/// Options recognised by converters. Unknown keys are ignored on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionOptions {
    /// Extract embedded images as assets. Default: true.
    pub include_images: bool,
    /// Prepend a metadata block to the markdown. Default: false.
    pub include_meta: bool,
    /// Keep hyperlinks as markdown links rather than plain text. Default: true.
    pub convert_links: bool,
    /// Link depth followed by a site crawl, 0–5. Default: 1.
    pub crawl_depth: u8,
    /// Maximum pages returned by a site crawl, 1–100. Default: 10.
    pub max_pages: u32,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_meta: false,
            convert_links: true,
            crawl_depth: 1,
            max_pages: 10,
        }
    }
}

impl ConversionOptions {
    /// Clamp crawl limits into their supported ranges.
    pub fn normalised(mut self) -> Self {
        self.crawl_depth = self.crawl_depth.min(5);
        self.max_pages = self.max_pages.clamp(1, 100);
        self
    }
}

// ── Service proxy ────────────────────────────────────────────────────────

/// Configuration for [`crate::service::ServiceProxy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Requests allowed per credential per minute. Default: 15.
    ///
    /// Matches the free-tier budget of the transcription models we target.
    pub requests_per_minute: u32,

    /// How long a cached response stays valid, in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Maximum number of cached responses. Default: 256.
    pub max_cache_entries: usize,

    /// Model label used in the cache key. Default: None.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 8192.
    ///
    /// An hour of speech is roughly 10k words; 8192 covers typical clips and
    /// lecture segments without truncating mid-sentence.
    pub max_tokens: usize,

    /// Retries after a failed call. Default: 3.
    pub max_retries: u32,

    /// Base back-off between retries in milliseconds, doubled per attempt.
    /// Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 15,
            cache_ttl_secs: 3600,
            max_cache_entries: 256,
            model: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}
