//! Input-shape validation, run before any converter sees the content.
//!
//! Each converter key accepts a fixed set of runtime shapes. A mismatch is
//! reported as [`ItemError::InvalidInputShape`] instead of letting a parser
//! fail on bytes it was never meant to read.
//!
//! `docx` and `pptx` get one extra check: both are zip containers, and a
//! password-protected Office file is stored as an encrypted compound file
//! instead. Without the `PK` signature we fail fast with a message that tells
//! the user what to do, rather than surfacing a parser's "invalid zip" error.

use crate::error::ItemError;
use crate::pipeline::registry::ConverterKey;
use crate::request::RequestContent;

/// Local-file-header signature that starts every zip archive.
const ZIP_SIGNATURE: &[u8; 2] = b"PK";

/// Runtime shape of request content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentShape {
    Binary,
    /// Text, or bytes that are valid UTF-8.
    Text,
    Structured,
}

/// Shapes each key accepts.
pub fn accepted_shapes(key: ConverterKey) -> &'static [ContentShape] {
    use ContentShape::*;
    match key {
        ConverterKey::Pdf | ConverterKey::Docx | ConverterKey::Pptx | ConverterKey::Xlsx => {
            &[Binary]
        }
        ConverterKey::Csv
        | ConverterKey::Json
        | ConverterKey::Xml
        | ConverterKey::Yaml
        | ConverterKey::Html
        | ConverterKey::Text
        | ConverterKey::Markdown => &[Text],
        ConverterKey::Url | ConverterKey::ParentUrl => &[Text, Structured],
        ConverterKey::Video => &[Binary, Text, Structured],
    }
}

/// Check `content` against the shape table for `key`.
pub fn validate_input(key: ConverterKey, content: &RequestContent, name: &str) -> Result<(), ItemError> {
    let accepted = accepted_shapes(key);
    if !accepted.iter().any(|shape| matches_shape(*shape, content)) {
        return Err(ItemError::InvalidInputShape {
            type_key: key.as_str().to_string(),
            expected: describe(accepted),
            found: describe_found(content),
        });
    }

    if matches!(key, ConverterKey::Url | ConverterKey::ParentUrl) && content.url().is_none_or(str::is_empty) {
        return Err(ItemError::InvalidInputShape {
            type_key: key.as_str().to_string(),
            expected: "a url".to_string(),
            found: describe_found(content),
        });
    }

    if matches!(key, ConverterKey::Docx | ConverterKey::Pptx) {
        if let RequestContent::Binary(bytes) = content {
            if !bytes.starts_with(ZIP_SIGNATURE) {
                return Err(ItemError::EncryptedContainer {
                    name: name.to_string(),
                    format: key.as_str().to_string(),
                });
            }
        }
    }

    Ok(())
}

fn matches_shape(shape: ContentShape, content: &RequestContent) -> bool {
    match (shape, content) {
        (ContentShape::Binary, RequestContent::Binary(_)) => true,
        (ContentShape::Text, RequestContent::Text(_)) => true,
        (ContentShape::Text, RequestContent::Binary(b)) => std::str::from_utf8(b).is_ok(),
        (ContentShape::Structured, RequestContent::Structured(_)) => true,
        _ => false,
    }
}

fn describe(shapes: &[ContentShape]) -> String {
    shapes
        .iter()
        .map(|s| match s {
            ContentShape::Binary => "binary",
            ContentShape::Text => "text",
            ContentShape::Structured => "structured",
        })
        .collect::<Vec<_>>()
        .join(" or ")
}

fn describe_found(content: &RequestContent) -> String {
    match content {
        RequestContent::Binary(b) if std::str::from_utf8(b).is_err() => "binary (not UTF-8)".into(),
        other => other.shape_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bin(bytes: &[u8]) -> RequestContent {
        RequestContent::Binary(bytes.to_vec())
    }

    #[test]
    fn pdf_rejects_text() {
        let err = validate_input(ConverterKey::Pdf, &RequestContent::Text("hi".into()), "a.pdf")
            .unwrap_err();
        match err {
            ItemError::InvalidInputShape { expected, found, .. } => {
                assert_eq!(expected, "binary");
                assert_eq!(found, "text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn text_formats_accept_utf8_uploads() {
        assert!(validate_input(ConverterKey::Csv, &bin(b"a,b\n1,2"), "t.csv").is_ok());
        let err = validate_input(ConverterKey::Csv, &bin(&[0xff, 0xfe, 0x00]), "t.csv").unwrap_err();
        assert!(err.to_string().contains("not UTF-8"), "got: {err}");
    }

    #[test]
    fn docx_without_zip_signature_is_reported_as_encrypted() {
        let ole = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        let err = validate_input(ConverterKey::Docx, &bin(&ole), "secret.docx").unwrap_err();
        assert_eq!(
            err,
            ItemError::EncryptedContainer {
                name: "secret.docx".into(),
                format: "docx".into()
            }
        );
        assert!(validate_input(ConverterKey::Docx, &bin(b"PK\x03\x04rest"), "ok.docx").is_ok());
    }

    #[test]
    fn xlsx_skips_signature_check() {
        assert!(validate_input(ConverterKey::Xlsx, &bin(b"not a zip"), "a.xlsx").is_ok());
    }

    #[test]
    fn url_needs_an_address() {
        assert!(validate_input(
            ConverterKey::Url,
            &RequestContent::Text("https://example.com".into()),
            "page"
        )
        .is_ok());
        assert!(validate_input(
            ConverterKey::ParentUrl,
            &RequestContent::Structured(json!({ "url": "https://example.com" })),
            "site"
        )
        .is_ok());
        assert!(validate_input(
            ConverterKey::Url,
            &RequestContent::Structured(json!({ "title": "no url" })),
            "page"
        )
        .is_err());
        assert!(validate_input(ConverterKey::Url, &bin(b"https://x"), "page").is_err());
    }

    #[test]
    fn video_accepts_media_bytes_and_links() {
        assert!(validate_input(ConverterKey::Video, &bin(&[0, 0, 0, 0x18]), "clip.mp4").is_ok());
        assert!(validate_input(
            ConverterKey::Video,
            &RequestContent::Text("https://video.example/watch?v=1".into()),
            "clip"
        )
        .is_ok());
    }
}
