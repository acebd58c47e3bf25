//! Where a successful result's files go inside the archive.
//!
//! Two layouts exist, picked from the classifier's output:
//!
//! | Strategy | When | Layout |
//! |----------|------|--------|
//! | [`SingleFile`] | every result except the one below | `{category}/{name}.md`, `{category}/assets/` |
//! | [`Site`] | category `web` with a source URL | `web/{host}/index.md`, `web/{host}/{page}.md`, `web/{host}/assets/` |
//!
//! Both write through [`ArchiveTree::write_unique`], so colliding names get a
//! `-2`, `-3`, … suffix instead of overwriting each other.

use crate::archive::ArchiveTree;
use crate::output::ConversionResult;
use crate::pipeline::classify::Category;
use crate::pipeline::sanitize::{sanitize_hostname, sanitize_name, split_extension};

/// A layout for one successful result.
pub trait PlacementStrategy: Send + Sync {
    /// Create (or reuse) the folder that holds the result's markdown and
    /// its `assets/` sibling. Returns the folder path.
    fn prepare_folder(&self, result: &ConversionResult, tree: &mut ArchiveTree) -> String;

    /// Write the markdown documents into `folder`. `rewrite` maps original
    /// image references to archived asset paths.
    fn write_documents(
        &self,
        result: &ConversionResult,
        folder: &str,
        rewrite: &dyn Fn(&str) -> String,
        tree: &mut ArchiveTree,
    );
}

/// One markdown file directly in the category folder.
pub struct SingleFile;

/// One sub-folder per host with an index page and the crawled pages.
pub struct Site;

/// Strategy for `result`.
pub fn strategy_for(result: &ConversionResult) -> &'static dyn PlacementStrategy {
    if result.category() == Category::Web && result.source_url().is_some() {
        &Site
    } else {
        &SingleFile
    }
}

impl PlacementStrategy for SingleFile {
    fn prepare_folder(&self, result: &ConversionResult, tree: &mut ArchiveTree) -> String {
        let folder = result.category().folder().to_string();
        tree.ensure_folder(&folder);
        folder
    }

    fn write_documents(
        &self,
        result: &ConversionResult,
        folder: &str,
        rewrite: &dyn Fn(&str) -> String,
        tree: &mut ArchiveTree,
    ) {
        let content = rewrite(result.content().unwrap_or_default());
        tree.write_unique(folder, result.name(), "md", content.into_bytes());
    }
}

impl PlacementStrategy for Site {
    fn prepare_folder(&self, result: &ConversionResult, tree: &mut ArchiveTree) -> String {
        let host = result
            .source_url()
            .and_then(sanitize_hostname)
            .unwrap_or_else(|| result.name().to_string());
        let folder = format!("{}/{}", Category::Web.folder(), host);
        tree.ensure_folder(&folder);
        folder
    }

    fn write_documents(
        &self,
        result: &ConversionResult,
        folder: &str,
        rewrite: &dyn Fn(&str) -> String,
        tree: &mut ArchiveTree,
    ) {
        let index = rewrite(result.content().unwrap_or_default());
        tree.write_unique(folder, "index", "md", index.into_bytes());

        for page in result.pages().unwrap_or_default() {
            let stem = page_stem(&page.name);
            tree.write_unique(folder, &stem, "md", rewrite(&page.content).into_bytes());
        }
    }
}

/// Page names are often URLs or file names; keep the last segment and drop
/// a markup extension.
fn page_stem(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let sanitized = sanitize_name(without_query);
    let (stem, ext) = split_extension(&sanitized);
    match ext.as_str() {
        "md" | "markdown" | "html" | "htm" => stem,
        _ => sanitized,
    }
}
