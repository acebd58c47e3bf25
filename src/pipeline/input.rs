//! Batch entry boundary: item descriptors + uploaded payloads → requests.
//!
//! This is the only place a batch can be rejected before conversion starts.
//! Two things reject it:
//!
//! - an empty item list ([`BatchError::EmptyBatch`]);
//! - a descriptor that cannot become a request: no content or a dangling
//!   upload key ([`BatchError::InvalidItem`]).
//!
//! Everything else (wrong shape, unknown type, missing credential, a remote
//! file that cannot be fetched) is an item-level failure decided later by
//! the orchestrator. Remote files are not touched here: they become
//! [`RequestContent::Remote`] and [`fetch_remote`] runs inside the item's
//! own conversion.
//!
//! Descriptors are plain serde structs so a JSON manifest maps straight onto
//! them:
//!
//! ```json
//! { "items": [
//!     { "kind": "file", "name": "report.docx", "upload": "u1" },
//!     { "kind": "url", "url": "https://example.com/post" },
//!     { "kind": "parent-url", "url": "https://docs.example.com", "options": { "maxPages": 20 } },
//!     { "kind": "file", "url": "https://example.com/data.csv" }
//! ] }
//! ```

use crate::config::{BatchConfig, ConversionOptions};
use crate::error::{BatchError, ItemError};
use crate::request::{ConversionRequest, Credential, ItemKind, RequestContent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// One item as submitted by the caller.
///
/// Exactly one content source is used, checked in this order: `upload`,
/// `data`, `url`, `text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescriptor {
    pub kind: Option<ItemKind>,
    #[serde(default)]
    pub name: String,
    /// Key into [`BatchInput::uploads`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Web address; for `file` items an http(s) URL is fetched when the
    /// item is converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Falls back to [`BatchConfig::default_options`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ConversionOptions>,
}

impl ItemDescriptor {
    /// A file item whose bytes are in the batch's uploads under `key`.
    pub fn upload(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: Some(ItemKind::File),
            name: name.into(),
            upload: Some(key.into()),
            ..Default::default()
        }
    }

    /// An item pointing at a web address.
    pub fn url(kind: ItemKind, url: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// A file item carrying its text inline.
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: Some(ItemKind::File),
            name: name.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Items, the binary payloads they reference, and an optional credential.
#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub items: Vec<ItemDescriptor>,
    pub uploads: HashMap<String, Vec<u8>>,
    pub credential: Option<Credential>,
}

impl BatchInput {
    pub fn new(items: Vec<ItemDescriptor>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn with_upload(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.uploads.insert(key.into(), bytes);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// A JSON batch manifest: `{ "items": [ ... ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub items: Vec<ItemDescriptor>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    let input = input.trim_start();
    input.starts_with("http://") || input.starts_with("https://")
}

/// Turn a batch into requests, in item order.
///
/// Performs no I/O; remote files are fetched later, per item.
pub async fn resolve_batch(
    input: BatchInput,
    config: &BatchConfig,
) -> Result<Vec<ConversionRequest>, BatchError> {
    let BatchInput {
        items,
        uploads,
        credential,
    } = input;

    if items.is_empty() {
        return Err(BatchError::EmptyBatch);
    }

    let mut requests = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let request = resolve_item(index, item, &uploads, config)?;
        let request = match &credential {
            Some(c) => request.with_credential(c.clone()),
            None => request,
        };
        requests.push(request);
    }
    info!("Resolved {} items", requests.len());
    Ok(requests)
}

fn resolve_item(
    index: usize,
    item: ItemDescriptor,
    uploads: &HashMap<String, Vec<u8>>,
    config: &BatchConfig,
) -> Result<ConversionRequest, BatchError> {
    let invalid = |reason: String| BatchError::InvalidItem { index, reason };
    let kind = item
        .kind
        .ok_or_else(|| invalid("missing 'kind'".to_string()))?;
    let options = item
        .options
        .unwrap_or_else(|| config.default_options.clone())
        .normalised();
    let mut name = item.name.trim().to_string();

    let content = if let Some(key) = item.upload {
        // Several items may share one upload, so clone rather than remove.
        let bytes = uploads
            .get(&key)
            .cloned()
            .ok_or_else(|| invalid(format!("upload '{key}' was not provided")))?;
        if name.is_empty() {
            name = key;
        }
        RequestContent::Binary(bytes)
    } else if let Some(data) = item.data {
        RequestContent::Structured(data)
    } else if let Some(url) = item.url.filter(|u| !u.trim().is_empty()) {
        let url = url.trim().to_string();
        match kind {
            ItemKind::File if is_url(&url) => {
                if name.is_empty() {
                    name = filename_from_url(&url).unwrap_or_default();
                }
                RequestContent::Remote(url)
            }
            ItemKind::File => {
                return Err(invalid(format!("file url '{url}' is not http(s)")));
            }
            _ => {
                if name.is_empty() {
                    name = url.clone();
                }
                RequestContent::Text(url)
            }
        }
    } else if let Some(text) = item.text {
        RequestContent::Text(text)
    } else {
        return Err(invalid("no content: set one of upload, data, url or text".to_string()));
    };

    if name.is_empty() {
        name = format!("item-{}", index + 1);
    }
    debug!("Item #{}: {} '{}' ({:?})", index, kind, name, content);
    Ok(ConversionRequest::new(kind, name, content).with_options(options))
}

/// Fetch a remote file into memory.
///
/// Every failure is an [`ItemError`] for the one item that referenced the
/// file; the rest of the batch carries on.
pub async fn fetch_remote(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ItemError> {
    info!("Downloading: {}", url);

    let failed = |reason: String| ItemError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ItemError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> BatchConfig {
        BatchConfig::default()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let err = resolve_batch(BatchInput::default(), &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::EmptyBatch));
    }

    #[tokio::test]
    async fn dangling_upload_is_invalid() {
        let input = BatchInput::new(vec![ItemDescriptor::upload("a.pdf", "missing")]);
        let err = resolve_batch(input, &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidItem { index: 0, .. }));
    }

    #[tokio::test]
    async fn descriptor_without_content_is_invalid() {
        let input = BatchInput::new(vec![
            ItemDescriptor::text("ok.txt", "hi"),
            ItemDescriptor {
                kind: Some(ItemKind::File),
                name: "empty".into(),
                ..Default::default()
            },
        ]);
        let err = resolve_batch(input, &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidItem { index: 1, .. }));
    }

    #[tokio::test]
    async fn resolves_every_content_source_in_order() {
        let input = BatchInput::new(vec![
            ItemDescriptor::upload("report.docx", "u1"),
            ItemDescriptor::url(ItemKind::Url, "https://example.com/post"),
            ItemDescriptor {
                kind: Some(ItemKind::ParentUrl),
                data: Some(json!({ "url": "https://docs.example.com" })),
                ..Default::default()
            },
            ItemDescriptor::text("notes.txt", "hello"),
        ])
        .with_upload("u1", b"PK\x03\x04".to_vec())
        .with_credential(Credential::new("sk"));

        let requests = resolve_batch(input, &config()).await.unwrap();
        assert_eq!(requests.len(), 4);
        assert!(matches!(requests[0].content, RequestContent::Binary(_)));
        assert_eq!(requests[1].name, "https://example.com/post");
        assert_eq!(
            requests[2].source_url().as_deref(),
            Some("https://docs.example.com")
        );
        assert_eq!(requests[2].name, "item-3");
        assert_eq!(requests[3].content.as_text(), Some("hello"));
        assert!(requests.iter().all(|r| r.credential().is_some()));
    }

    #[tokio::test]
    async fn options_default_and_are_normalised() {
        let opts = ConversionOptions {
            max_pages: 500,
            ..Default::default()
        };
        let input = BatchInput::new(vec![
            ItemDescriptor::text("a.txt", "x"),
            ItemDescriptor::text("b.txt", "y").with_options(opts),
        ]);
        let requests = resolve_batch(input, &config()).await.unwrap();
        assert_eq!(requests[0].options, ConversionOptions::default());
        assert_eq!(requests[1].options.max_pages, 100);
    }

    #[tokio::test]
    async fn local_file_url_is_rejected() {
        let input = BatchInput::new(vec![ItemDescriptor::url(ItemKind::File, "/etc/passwd")]);
        let err = resolve_batch(input, &config()).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidItem { .. }));
    }

    #[tokio::test]
    async fn remote_file_is_deferred_to_conversion() {
        let input = BatchInput::new(vec![
            ItemDescriptor::url(ItemKind::File, "http://127.0.0.1:1/files/data.csv"),
            ItemDescriptor::url(ItemKind::File, "https://example.com/").with_name("export"),
        ]);
        let requests = resolve_batch(input, &config()).await.unwrap();
        assert_eq!(requests[0].name, "data.csv");
        assert!(matches!(
            &requests[0].content,
            RequestContent::Remote(url) if url == "http://127.0.0.1:1/files/data.csv"
        ));
        assert_eq!(requests[1].name, "export");
    }

    #[tokio::test]
    async fn unreachable_remote_is_an_item_error() {
        let err = fetch_remote("http://127.0.0.1:1/missing.pdf", 5).await.unwrap_err();
        match err {
            ItemError::DownloadFailed { url, .. } => {
                assert_eq!(url, "http://127.0.0.1:1/missing.pdf")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn manifest_parses_wire_format() {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "items": [
                { "kind": "parent-url", "url": "https://docs.example.com", "options": { "maxPages": 20 } },
                { "kind": "file", "name": "a.pdf", "upload": "a" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(manifest.items[0].kind, Some(ItemKind::ParentUrl));
        assert_eq!(manifest.items[0].options.as_ref().unwrap().max_pages, 20);
        assert_eq!(manifest.items[1].upload.as_deref(), Some("a"));
    }

    #[test]
    fn filenames_from_urls() {
        assert_eq!(
            filename_from_url("https://example.com/files/report.pdf?x=1").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }
}
