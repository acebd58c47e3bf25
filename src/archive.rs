//! Archive assembly: results → in-memory tree → zip bytes.
//!
//! ```text
//! documents/report.md
//! documents/assets/chart.png
//! data/sheet.md
//! web/docs.example.com/index.md
//! web/docs.example.com/install.md
//! errors/talk_error.md
//! summary.md
//! ```
//!
//! Category folders are created on first use, except `errors/`, which is
//! always present. Every file name is collision-checked against its folder,
//! so nothing is ever silently overwritten.

use crate::error::BatchError;
use crate::output::ConversionResult;
use crate::pipeline::assets::{asset_file_parts, decode_image, rewrite_all};
use crate::pipeline::classify::Category;
use crate::pipeline::placement::strategy_for;
use crate::pipeline::sanitize::disambiguate;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the run report at the archive root.
pub const SUMMARY_FILE: &str = "summary.md";

/// Sub-folder holding a result's decoded images.
pub const ASSETS_FOLDER: &str = "assets";

// ── Tree ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Entry {
    Folder(String),
    File { path: String, bytes: Vec<u8> },
}

/// Ordered set of folders and files waiting to be zipped.
///
/// Entries are serialised in insertion order. Paths use `/` and never carry
/// a trailing slash.
#[derive(Debug, Clone, Default)]
pub struct ArchiveTree {
    entries: Vec<Entry>,
    paths: HashSet<String>,
}

impl ArchiveTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a folder or file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Create `path` and any missing parents.
    pub fn ensure_folder(&mut self, path: &str) {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if self.paths.insert(prefix.clone()) {
                self.entries.push(Entry::Folder(prefix.clone()));
            }
        }
    }

    /// Write `bytes` to the first free `stem[-n].ext` inside `folder`.
    ///
    /// Returns the file name actually used (without the folder).
    pub fn write_unique(&mut self, folder: &str, stem: &str, ext: &str, bytes: Vec<u8>) -> String {
        self.ensure_folder(folder);
        let file_name = disambiguate(stem, ext, |candidate| {
            self.paths.contains(&join(folder, candidate))
        });
        let path = join(folder, &file_name);
        if file_name != disambiguate(stem, ext, |_| false) {
            debug!("Name collision in '{}', writing '{}'", folder, file_name);
        }
        self.paths.insert(path.clone());
        self.entries.push(Entry::File { path, bytes });
        file_name
    }

    /// Bytes of the file at `path`.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.entries.iter().find_map(|e| match e {
            Entry::File { path: p, bytes } if p == path => Some(bytes.as_slice()),
            _ => None,
        })
    }

    /// Every file path, in insertion order.
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            Entry::File { path, .. } => Some(path.as_str()),
            Entry::Folder(_) => None,
        })
    }

    /// Serialise to a zip archive using deflate.
    pub fn to_zip(&self, compression_level: Option<i64>) -> Result<Vec<u8>, BatchError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(compression_level);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            match entry {
                Entry::Folder(path) => zip.add_directory(format!("{path}/"), options)?,
                Entry::File { path, bytes } => {
                    zip.start_file(path.clone(), options)?;
                    zip.write_all(bytes)?;
                }
            }
        }
        Ok(zip.finish()?.into_inner())
    }
}

fn join(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Turns an ordered result list into one zip archive.
///
/// # Example
/// ```rust
/// use edgequake_batch2md::ArchiveBuilder;
///
/// let bytes = ArchiveBuilder::new().build(&[]).unwrap();
/// assert!(bytes.starts_with(b"PK"));
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    compression_level: Option<i64>,
    generated_at: DateTime<Utc>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            compression_level: None,
            generated_at: Utc::now(),
        }
    }

    pub fn compression_level(mut self, level: Option<i64>) -> Self {
        self.compression_level = level;
        self
    }

    /// Timestamp written into error files and the summary.
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Assemble and serialise. Fails only if zip serialisation fails.
    pub fn build(&self, results: &[ConversionResult]) -> Result<Vec<u8>, BatchError> {
        let tree = self.assemble(results);
        tree.to_zip(self.compression_level)
    }

    /// Lay out every result in an [`ArchiveTree`] without serialising it.
    pub fn assemble(&self, results: &[ConversionResult]) -> ArchiveTree {
        let mut tree = ArchiveTree::new();
        tree.ensure_folder(Category::Errors.folder());

        for result in results {
            if result.is_success() {
                self.place_success(result, &mut tree);
            } else {
                self.place_failure(result, &mut tree);
            }
        }

        if results.iter().any(ConversionResult::is_success) {
            let summary = self.summary(results);
            tree.write_unique("", "summary", "md", summary.into_bytes());
        }
        tree
    }

    fn place_success(&self, result: &ConversionResult, tree: &mut ArchiveTree) {
        let strategy = strategy_for(result);
        let folder = strategy.prepare_folder(result, tree);
        let assets_folder = join(&folder, ASSETS_FOLDER);

        let mut replacements: Vec<(String, String)> = Vec::new();
        for image in result.images() {
            let bytes = match decode_image(image) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Skipping image '{}' of '{}': invalid base64 ({})",
                        image.name,
                        result.name(),
                        e
                    );
                    continue;
                }
            };
            let (stem, ext) = asset_file_parts(image);
            let file_name = tree.write_unique(&assets_folder, &stem, &ext, bytes);
            if !image.path.trim().is_empty() {
                replacements.push((image.path.clone(), format!("{ASSETS_FOLDER}/{file_name}")));
            }
        }

        let rewrite = |markdown: &str| rewrite_all(markdown, &replacements);
        strategy.write_documents(result, &folder, &rewrite, tree);
    }

    fn place_failure(&self, result: &ConversionResult, tree: &mut ArchiveTree) {
        let message = result
            .error()
            .map(ToString::to_string)
            .unwrap_or_else(|| "Unknown error".to_string());
        let body = format!(
            "# Conversion error: {name}\n\n\
             - **Item**: {name}\n\
             - **Kind**: {kind}\n\
             - **Time**: {time}\n\n\
             ## Error\n\n{message}\n",
            name = result.name(),
            kind = result.kind(),
            time = self.timestamp(),
        );
        tree.write_unique(
            Category::Errors.folder(),
            &format!("{}_error", result.name()),
            "md",
            body.into_bytes(),
        );
    }

    fn summary(&self, results: &[ConversionResult]) -> String {
        let succeeded: Vec<&ConversionResult> = results.iter().filter(|r| r.is_success()).collect();
        let failed: Vec<&ConversionResult> = results.iter().filter(|r| !r.is_success()).collect();

        let mut out = String::new();
        out.push_str("# Conversion Summary\n\n");
        out.push_str(&format!("- Generated: {}\n", self.timestamp()));
        out.push_str(&format!("- Total items: {}\n", results.len()));
        out.push_str(&format!("- Successful: {}\n", succeeded.len()));
        out.push_str(&format!("- Failed: {}\n", failed.len()));

        out.push_str("\n## Successful\n\n");
        for r in &succeeded {
            match r.images().len() {
                0 => out.push_str(&format!("- {} ({})\n", r.name(), r.kind())),
                1 => out.push_str(&format!("- {} ({}, 1 image)\n", r.name(), r.kind())),
                n => out.push_str(&format!("- {} ({}, {} images)\n", r.name(), r.kind(), n)),
            }
        }

        if !failed.is_empty() {
            out.push_str("\n## Failed\n\n");
            for r in &failed {
                let message = r.error().map(ToString::to_string).unwrap_or_default();
                out.push_str(&format!("- {}: {}\n", r.name(), message));
            }
        }
        out
    }

    fn timestamp(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
