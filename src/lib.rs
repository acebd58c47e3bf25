//! # edgequake-batch2md
//!
//! Convert a heterogeneous batch (uploaded files, web pages, whole sites,
//! video links) into one zip archive of Markdown, organised by category.
//!
//! ## Pipeline Overview
//!
//! ```text
//! batch
//!  │
//!  ├─ 1. Input     uploads / URLs / inline text → requests
//!  ├─ 2. Classify  kind + extension → documents, data, web, multimedia, other
//!  ├─ 3. Gate      multimedia without a credential fails without a call
//!  ├─ 4. Convert   fetch remote files, convert; concurrent, per-item
//!  │               timeout, faults isolated per item
//!  ├─ 5. Place     category folder, collision-free names, assets/
//!  └─ 6. Archive   zip with errors/ and summary.md
//! ```
//!
//! Conversion itself is pluggable: a [`ConverterRegistry`] maps type keys to
//! [`Converter`]s. Text, Markdown, JSON and CSV are built in; transcription
//! of audio, video and video links goes through a [`ServiceProxy`] that
//! caches responses and rate-limits per credential.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_batch2md::{BatchConfig, BatchInput, ConverterRegistry, ItemDescriptor, Orchestrator};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(ConverterRegistry::with_builtins()),
//!         BatchConfig::default(),
//!     );
//!     let input = BatchInput::new(vec![
//!         ItemDescriptor::text("notes.md", "# Notes"),
//!         ItemDescriptor::text("sales.csv", "region,total\neu,12\n"),
//!     ]);
//!     let output = orchestrator
//!         .convert_to_file(input, "batch.zip", &CancellationToken::new())
//!         .await?;
//!     eprintln!("{} ok / {} failed", output.stats.succeeded, output.stats.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `batch2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-batch2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod converters;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod request;
pub mod service;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{ArchiveBuilder, ArchiveTree};
pub use config::{BatchConfig, BatchConfigBuilder, ConversionOptions, ServiceConfig};
pub use convert::Orchestrator;
pub use converters::{CsvConverter, JsonConverter, MediaTranscriber, TextConverter};
pub use error::{BatchError, ConverterError, ItemError};
pub use output::{BatchOutput, BatchStats, ConversionResult, ImageAsset, PageContent};
pub use pipeline::classify::{classify, Category};
pub use pipeline::input::{BatchInput, ItemDescriptor, Manifest};
pub use pipeline::registry::{Converter, ConverterContext, ConverterKey, ConverterOutput, ConverterRegistry};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{ConversionRequest, Credential, ItemKind, RequestContent};
pub use service::{CompletionBackend, KeyedProviderBackend, ServiceProxy};
pub use stream::{convert_stream, ResultStream};
