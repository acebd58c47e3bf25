//! Filesystem-safe names for archive entries.
//!
//! Names come from uploads, page titles and URLs, so they can contain path
//! separators, control characters, or nothing at all. Every archive path
//! segment goes through [`sanitize_name`], and every file written into a
//! folder goes through [`disambiguate`] so two items that sanitise to the
//! same name are both kept.

use crate::request::ItemKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Longest name segment we emit, in characters.
const MAX_NAME_CHARS: usize = 100;

/// Used when sanitising leaves nothing behind.
pub const FALLBACK_NAME: &str = "untitled";

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}._-]+").unwrap());

static RE_REPEATED_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// Make `raw` safe to use as a single archive path segment.
///
/// Keeps letters, digits, `.`, `_` and `-`; everything else becomes `_`.
/// Directory components are dropped, leading dots are removed so the result
/// can never be `..` or a hidden file, and the result is never empty.
pub fn sanitize_name(raw: &str) -> String {
    let last = raw
        .trim()
        .rsplit(['/', '\\'])
        .find(|s| !s.trim().is_empty())
        .unwrap_or("");
    let replaced = RE_UNSAFE.replace_all(last.trim(), "_");
    let collapsed = RE_REPEATED_SEPARATORS.replace_all(&replaced, "_");
    let trimmed = collapsed
        .trim_start_matches(['.', '_', '-'])
        .trim_end_matches(['.', '_', '-', ' ']);

    let truncated: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    let truncated = truncated.trim_end_matches(['.', '_', '-']);
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

/// Name stored on a result: file items lose their extension (the archive
/// entry gets `.md`), every other kind keeps its full display name.
pub fn result_name(kind: ItemKind, raw: &str) -> String {
    match kind {
        ItemKind::File => {
            let stem = Path::new(raw.trim())
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(raw);
            sanitize_name(stem)
        }
        ItemKind::Url | ItemKind::ParentUrl | ItemKind::VideoLink => sanitize_name(raw),
    }
}

/// Sanitised host of `url`, e.g. `docs.example.com`.
///
/// `None` when the URL does not parse or has no host.
pub fn sanitize_hostname(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(sanitize_name(&host))
}

/// First free file name of the form `stem.ext`, `stem-2.ext`, `stem-3.ext`, …
///
/// `ext` is given without the dot and may be empty.
pub fn disambiguate(stem: &str, ext: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let join = |s: &str| {
        if ext.is_empty() {
            s.to_string()
        } else {
            format!("{s}.{ext}")
        }
    };

    let first = join(stem);
    if !is_taken(&first) {
        return first;
    }
    (2..)
        .map(|n| join(&format!("{stem}-{n}")))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(first)
}

/// Split a file name into `(stem, ext)`; `ext` is lower-cased and may be empty.
pub fn split_extension(name: &str) -> (String, String) {
    let path = Path::new(name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) if !stem.is_empty() => (stem.to_string(), ext.to_ascii_lowercase()),
        _ => (name.to_string(), String::new()),
    }
}
