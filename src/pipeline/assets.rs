//! Image assets: base64 → bytes, archive file names, link rewriting.
//!
//! Converters hand images over as base64 (the same wire form a VLM request
//! uses). The archive stores raw bytes under an `assets/` folder and rewrites
//! every literal occurrence of the image's original reference in the markdown
//! to the relative asset path, so the bundle renders offline.

use crate::output::ImageAsset;
use crate::pipeline::sanitize::{sanitize_name, split_extension};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Decode an image payload.
///
/// Accepts plain base64, base64 with line breaks, unpadded base64 and
/// `data:<mime>;base64,` URIs.
pub fn decode_image(image: &ImageAsset) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match image.data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image.data.as_str(),
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
}

/// `(stem, ext)` for an image's archive file name, before collision checks.
///
/// The name comes from `image.name`, else the last segment of
/// `image.path`, else `image`. A missing extension is derived from the mime
/// type.
pub fn asset_file_parts(image: &ImageAsset) -> (String, String) {
    let raw = if !image.name.trim().is_empty() {
        image.name.clone()
    } else {
        last_path_segment(&image.path).unwrap_or_else(|| "image".to_string())
    };

    let sanitized = sanitize_name(&raw);
    let (stem, ext) = split_extension(&sanitized);
    let ext = if ext.is_empty() {
        extension_for_mime(&image.mime_type)
    } else {
        ext
    };
    (stem, ext)
}

/// Replace every literal occurrence of `original` in `markdown`.
///
/// `original` is escaped before it is compiled, so URLs containing `?`, `+`,
/// `(` or `.` match only themselves.
pub fn rewrite_references(markdown: &str, original: &str, replacement: &str) -> String {
    rewrite_all(markdown, &[(original.to_string(), replacement.to_string())])
}

/// Apply several `(original, replacement)` rewrites in a single pass.
///
/// Longer originals win where two overlap (`pic.jpg` vs `pic.jpg?w=200`),
/// and replaced text is never matched again. When the same original appears
/// twice, the first replacement is used.
pub fn rewrite_all(markdown: &str, replacements: &[(String, String)]) -> String {
    let mut targets: HashMap<&str, &str> = HashMap::new();
    for (from, to) in replacements {
        let from = from.trim();
        if !from.is_empty() {
            targets.entry(from).or_insert(to.as_str());
        }
    }
    if targets.is_empty() {
        return markdown.to_string();
    }

    let mut originals: Vec<&str> = targets.keys().copied().collect();
    originals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let pattern = originals
        .iter()
        .map(|o| regex::escape(o))
        .collect::<Vec<_>>()
        .join("|");

    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(markdown, |caps: &regex::Captures<'_>| {
                targets.get(&caps[0]).copied().unwrap_or(&caps[0]).to_string()
            })
            .into_owned(),
        Err(e) => {
            debug!("Could not compile reference pattern: {}", e);
            markdown.to_string()
        }
    }
}

fn last_path_segment(path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let without_query = path
        .split(['?', '#'])
        .next()
        .unwrap_or(path)
        .trim_end_matches('/');
    without_query
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}

fn extension_for_mime(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();
    let preferred = match mime.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    };
    preferred
        .map(str::to_string)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&mime)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_and_data_uri_payloads() {
        let bytes = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        let b64 = STANDARD.encode(&bytes);

        let plain = ImageAsset::new("a.png", b64.clone(), "image/png");
        assert_eq!(decode_image(&plain).unwrap(), bytes);

        let uri = ImageAsset::new("a.png", format!("data:image/png;base64,{b64}"), "image/png");
        assert_eq!(decode_image(&uri).unwrap(), bytes);

        let wrapped = ImageAsset::new("a.png", format!("{}\n{}", &b64[..4], &b64[4..]), "image/png");
        assert_eq!(decode_image(&wrapped).unwrap(), bytes);
    }

    #[test]
    fn rejects_garbage() {
        let img = ImageAsset::new("a.png", "***not base64***", "image/png");
        assert!(decode_image(&img).is_err());
    }

    #[test]
    fn file_parts_from_name_path_or_mime() {
        let named = ImageAsset::new("Chart 1.PNG", "", "image/png");
        assert_eq!(asset_file_parts(&named), ("Chart_1".into(), "png".into()));

        let from_url = ImageAsset::new("", "", "image/jpeg")
            .with_path("https://example.com/img/pic.jpg?w=200");
        assert_eq!(asset_file_parts(&from_url), ("pic".into(), "jpg".into()));

        let bare = ImageAsset::new("", "", "image/webp");
        assert_eq!(asset_file_parts(&bare), ("image".into(), "webp".into()));

        let unknown = ImageAsset::new("blob", "", "application/x-unknown-thing");
        assert_eq!(asset_file_parts(&unknown), ("blob".into(), "bin".into()));
    }

    #[test]
    fn rewrites_every_literal_occurrence() {
        let md = "![a](https://example.com/pic.jpg) and again https://example.com/pic.jpg";
        let out = rewrite_references(md, "https://example.com/pic.jpg", "assets/pic.jpg");
        assert_eq!(out, "![a](assets/pic.jpg) and again assets/pic.jpg");
    }

    #[test]
    fn metacharacters_in_urls_are_literal() {
        let md = "![x](https://cdn.example.com/a+b.png?size=(1))  https://cdnXexample.com/a+b.png";
        let out = rewrite_references(md, "https://cdn.example.com/a+b.png?size=(1)", "assets/a_b.png");
        assert!(out.starts_with("![x](assets/a_b.png)"));
        assert!(out.ends_with("https://cdnXexample.com/a+b.png"));
    }

    #[test]
    fn replacement_is_not_expanded() {
        let out = rewrite_references("see OLD", "OLD", "assets/$1.png");
        assert_eq!(out, "see assets/$1.png");
    }

    #[test]
    fn longer_reference_wins_over_its_prefix() {
        let md = "![a](https://x.com/pic.jpg) ![b](https://x.com/pic.jpg?w=200)";
        let out = rewrite_all(
            md,
            &[
                ("https://x.com/pic.jpg".into(), "assets/pic.jpg".into()),
                ("https://x.com/pic.jpg?w=200".into(), "assets/pic-2.jpg".into()),
            ],
        );
        assert_eq!(out, "![a](assets/pic.jpg) ![b](assets/pic-2.jpg)");
    }

    #[test]
    fn replaced_text_is_not_rewritten_again() {
        let out = rewrite_all(
            "![a](pic.png)",
            &[
                ("pic.png".into(), "assets/pic.png".into()),
                ("assets/pic.png".into(), "wrong".into()),
            ],
        );
        assert_eq!(out, "![a](assets/pic.png)");
    }

    #[test]
    fn empty_reference_leaves_markdown_alone() {
        assert_eq!(rewrite_references("abc", "  ", "x"), "abc");
    }
}
