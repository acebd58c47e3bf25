//! Batch conversion entry points.
//!
//! ## Per-item state machine
//!
//! ```text
//! pending ──classify──▶ credential check ──▶ converting ──▶ succeeded
//!                            │ missing            │
//!                            ▼                    ├─ download error ──▶ failed
//!                          failed                 ├─ converter error ─▶ failed
//!                                                 ├─ panic ───────────▶ failed
//!                                                 ├─ timeout ─────────▶ failed
//!                                                 └─ cancelled ───────▶ failed
//! ```
//!
//! "Converting" includes fetching a remote file reference, so the fetch runs
//! under the item's timeout, cancellation and concurrency slot. No retries
//! happen here; a converter that wants them does its own (the service proxy
//! does).
//!
//! ## Ordering and isolation
//!
//! [`Orchestrator::convert_many`] runs up to `concurrency` items at once and
//! returns exactly one result per request, in request order. It never fails:
//! every fault becomes a failed result. Only [`Orchestrator::run_batch`] can
//! fail, when the batch is malformed, cancelled, or the zip cannot be
//! written.

use crate::archive::ArchiveBuilder;
use crate::config::BatchConfig;
use crate::error::{BatchError, ItemError};
use crate::output::{BatchOutput, BatchStats, ConversionResult};
use crate::pipeline::classify::classify;
use crate::pipeline::input::{fetch_remote, resolve_batch, BatchInput};
use crate::pipeline::registry::{ConverterContext, ConverterRegistry};
use crate::progress::percent;
use crate::request::{ConversionRequest, RequestContent};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs requests through the registry and packs the results.
///
/// Cheap to clone: the registry is shared behind an `Arc`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_batch2md::{BatchConfig, BatchInput, ConverterRegistry, ItemDescriptor, Orchestrator};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(
///     Arc::new(ConverterRegistry::with_builtins()),
///     BatchConfig::default(),
/// );
/// let input = BatchInput::new(vec![ItemDescriptor::text("notes.txt", "hello")]);
/// let output = orchestrator.run_batch(input, &CancellationToken::new()).await?;
/// std::fs::write("batch.zip", &output.archive)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ConverterRegistry>,
    config: BatchConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<ConverterRegistry>, config: BatchConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    /// Convert one request. Never fails; faults become a failed result.
    pub async fn convert_one(
        &self,
        request: ConversionRequest,
        cancel: &CancellationToken,
    ) -> ConversionResult {
        let kind = request.kind;
        let category = classify(kind, request.extension().as_deref());

        if category.requires_credential() && request.credential().is_none() {
            warn!("'{}': no credential for {} item, skipping", request.name, category);
            return ConversionResult::failed(
                kind,
                category,
                &request.name,
                ItemError::CredentialRequired {
                    category: category.to_string(),
                },
            );
        }
        if cancel.is_cancelled() {
            return ConversionResult::failed(kind, category, &request.name, ItemError::Cancelled);
        }

        let type_key = kind.type_key(&request.name);
        let ctx = ConverterContext {
            name: request.name.clone(),
            credential: request.credential().cloned(),
            options: request.options.clone(),
            cancel: cancel.child_token(),
        };
        let secs = self.config.item_timeout_secs;
        let download_secs = self.config.download_timeout_secs;
        let start = Instant::now();

        let work = async {
            let fetched;
            let content = match &request.content {
                RequestContent::Remote(url) => {
                    fetched = RequestContent::Binary(fetch_remote(url, download_secs).await?);
                    &fetched
                }
                other => other,
            };
            self.registry.dispatch(&type_key, content, &ctx).await
        };
        let dispatch = AssertUnwindSafe(work).catch_unwind();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ItemError::Cancelled),
            r = tokio::time::timeout(Duration::from_secs(secs), dispatch) => match r {
                Err(_) => Err(ItemError::Timeout { secs }),
                Ok(Err(panic)) => Err(ItemError::ConversionFailed {
                    detail: panic_message(panic.as_ref()),
                }),
                Ok(Ok(result)) => result,
            },
        };

        match outcome {
            Ok(output) => {
                debug!(
                    "'{}' converted in {}ms ({} chars, {} images)",
                    request.name,
                    start.elapsed().as_millis(),
                    output.content.len(),
                    output.images.len()
                );
                let images = if request.options.include_images {
                    output.images
                } else {
                    Vec::new()
                };
                ConversionResult::succeeded(
                    kind,
                    category,
                    &request.name,
                    output.content,
                    images,
                    request.source_url(),
                    output.pages,
                )
            }
            Err(e) => {
                warn!("'{}' failed: {}", request.name, e);
                ConversionResult::failed(kind, category, &request.name, e)
            }
        }
    }

    /// Convert every request. Returns one result per request, in order.
    pub async fn convert_many(
        &self,
        requests: Vec<ConversionRequest>,
        cancel: &CancellationToken,
    ) -> Vec<ConversionResult> {
        let total = requests.len();
        let started = Instant::now();
        let callback = self.config.progress_callback.as_ref();
        info!(
            "Converting {} items (concurrency {})",
            total, self.config.concurrency
        );
        if let Some(cb) = callback {
            cb.on_batch_start(total);
        }

        let completed = AtomicUsize::new(0);
        let completed = &completed;
        let mut indexed: Vec<(usize, ConversionResult)> =
            stream::iter(requests.into_iter().enumerate().map(|(index, request)| async move {
                if let Some(cb) = callback {
                    cb.on_item_start(index, total, &request.name);
                }
                let result = self.convert_one(request, cancel).await;
                if let Some(cb) = callback {
                    match (result.content(), result.error()) {
                        (Some(md), _) => cb.on_item_complete(index, total, md.len()),
                        (None, Some(e)) => cb.on_item_error(index, total, &e.to_string()),
                        (None, None) => {}
                    }
                    // Workers may finish out of order; only the final report
                    // below may say 100.
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let pct = percent(done, total);
                    if pct < 100 {
                        cb.on_progress(pct);
                    }
                }
                (index, result)
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<ConversionResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            "Converted {}/{} items in {}ms",
            succeeded,
            total,
            started.elapsed().as_millis()
        );
        if let Some(cb) = callback {
            cb.on_progress(100);
            cb.on_batch_complete(total, succeeded);
        }
        results
    }

    /// Resolve, convert and pack a whole batch.
    ///
    /// # Errors
    /// - [`BatchError::EmptyBatch`] / [`BatchError::InvalidItem`] when the
    ///   batch cannot be formed
    /// - [`BatchError::Cancelled`] when `cancel` fired; no archive is built
    /// - [`BatchError::ArchiveAssemblyFailed`] when zip serialisation fails
    pub async fn run_batch(
        &self,
        input: BatchInput,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, BatchError> {
        let started = Instant::now();
        let requests = resolve_batch(input, &self.config).await?;
        let results = self.convert_many(requests, cancel).await;

        if cancel.is_cancelled() {
            warn!("Batch cancelled, discarding {} results", results.len());
            return Err(BatchError::Cancelled);
        }

        let builder = ArchiveBuilder::new().compression_level(self.config.compression_level);
        let (archive, results) = tokio::task::spawn_blocking(move || {
            let archive = builder.build(&results);
            (archive, results)
        })
        .await
        .map_err(|e| BatchError::Internal(format!("Archive task failed: {e}")))?;
        let archive = archive?;

        let stats = BatchStats::from_results(&results, started.elapsed().as_millis() as u64);
        info!(
            "Archive ready: {} bytes, {} ok / {} failed",
            archive.len(),
            stats.succeeded,
            stats.failed
        );
        Ok(BatchOutput {
            archive,
            results,
            stats,
        })
    }

    /// Run a batch and write the archive to `output_path`.
    ///
    /// The archive is written to a temp file in the same directory and
    /// renamed into place, so a crash never leaves a partial zip behind.
    pub async fn convert_to_file(
        &self,
        input: BatchInput,
        output_path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, BatchError> {
        let output = self.run_batch(input, cancel).await?;
        let path = output_path.as_ref().to_path_buf();
        let archive = output.archive.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &archive))
            .await
            .map_err(|e| BatchError::Internal(format!("Write task failed: {e}")))??;
        Ok(output)
    }

    /// Blocking wrapper around [`Orchestrator::run_batch`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn run_batch_sync(&self, input: BatchInput) -> Result<BatchOutput, BatchError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.run_batch(input, &CancellationToken::new()))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    let write_err = |source: std::io::Error| BatchError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("converter panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConverterError;
    use crate::pipeline::classify::Category;
    use crate::pipeline::registry::{from_fn, ConverterKey, ConverterOutput};
    use crate::progress::BatchProgressCallback;
    use crate::request::{Credential, ItemKind, RequestContent};
    use std::sync::Mutex;

    fn text(name: &str) -> ConversionRequest {
        ConversionRequest::new(ItemKind::File, name, RequestContent::Text("body".into()))
    }

    fn orchestrator(registry: ConverterRegistry, config: BatchConfig) -> Orchestrator {
        Orchestrator::new(Arc::new(registry), config)
    }

    #[tokio::test]
    async fn missing_credential_skips_the_converter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut registry = ConverterRegistry::new();
        registry.register(
            ConverterKey::Video,
            Arc::new(from_fn(move |_c, _ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ConverterError>(ConverterOutput::markdown("t")) }
            })),
        );
        let o = orchestrator(registry, BatchConfig::default());
        let req = ConversionRequest::new(ItemKind::File, "talk.mp3", RequestContent::Binary(vec![1]));

        let result = o.convert_one(req.clone(), &CancellationToken::new()).await;
        assert_eq!(result.category(), Category::Multimedia);
        assert!(matches!(result.error(), Some(ItemError::CredentialRequired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = o
            .convert_one(req.with_credential(Credential::new("k")), &CancellationToken::new())
            .await;
        assert!(ok.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            ConverterKey::Text,
            Arc::new(from_fn(|_c, _ctx| async {
                if true {
                    panic!("parser exploded");
                }
                Ok::<_, ConverterError>(ConverterOutput::default())
            })),
        );
        let o = orchestrator(registry, BatchConfig::default());
        let result = o.convert_one(text("a.txt"), &CancellationToken::new()).await;
        match result.error() {
            Some(ItemError::ConversionFailed { detail }) => assert!(detail.contains("parser exploded")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_item_times_out_without_blocking_others() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            ConverterKey::Text,
            Arc::new(from_fn(|_c, ctx| async move {
                if ctx.name == "slow.txt" {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok::<_, ConverterError>(ConverterOutput::markdown(ctx.name))
            })),
        );
        let config = BatchConfig::builder().item_timeout_secs(5).build().unwrap();
        let o = orchestrator(registry, config);

        let results = o
            .convert_many(vec![text("slow.txt"), text("fast.txt")], &CancellationToken::new())
            .await;
        assert_eq!(results[0].error(), Some(&ItemError::Timeout { secs: 5 }));
        assert_eq!(results[1].content(), Some("fast.txt"));
    }

    #[tokio::test]
    async fn cancelled_batch_marks_every_item() {
        let o = orchestrator(ConverterRegistry::with_builtins(), BatchConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = o.convert_many(vec![text("a.txt"), text("b.txt")], &cancel).await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.error() == Some(&ItemError::Cancelled)));
    }

    #[tokio::test]
    async fn images_dropped_when_disabled() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            ConverterKey::Text,
            Arc::new(from_fn(|_c, _ctx| async {
                Ok::<_, ConverterError>(ConverterOutput::markdown("x").with_images(vec![
                    crate::output::ImageAsset::new("a.png", "AA==", "image/png"),
                ]))
            })),
        );
        let o = orchestrator(registry, BatchConfig::default());
        let mut req = text("a.txt");
        req.options.include_images = false;
        let result = o.convert_one(req, &CancellationToken::new()).await;
        assert!(result.is_success());
        assert!(result.images().is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        percents: Mutex<Vec<u8>>,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for Recorder {
        fn on_progress(&self, percent: u8) {
            self.percents.lock().unwrap().push(percent);
        }
        fn on_item_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_ends_with_exactly_one_hundred() {
        let recorder = Arc::new(Recorder::default());
        let config = BatchConfig::builder()
            .concurrency(3)
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let o = orchestrator(ConverterRegistry::with_builtins(), config);
        let requests = vec![text("a.txt"), text("b.exe"), text("c.txt")];
        o.convert_many(requests, &CancellationToken::new()).await;

        let percents = recorder.percents.lock().unwrap().clone();
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(percents.len(), 3);
        assert!(percents[..2].iter().all(|p| [33, 66].contains(p)));
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_request_list_still_reports_completion() {
        let recorder = Arc::new(Recorder::default());
        let config = BatchConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let o = orchestrator(ConverterRegistry::new(), config);
        let results = o.convert_many(vec![], &CancellationToken::new()).await;
        assert!(results.is_empty());
        assert_eq!(*recorder.percents.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn run_batch_rejects_cancelled_batches() {
        let o = orchestrator(ConverterRegistry::with_builtins(), BatchConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = BatchInput::new(vec![crate::pipeline::input::ItemDescriptor::text("a.txt", "x")]);
        let err = o.run_batch(input, &cancel).await.unwrap_err();
        assert!(matches!(err, BatchError::Cancelled));
    }

    #[test]
    fn write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.zip");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "converter panicked: boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "converter panicked: bang");
    }
}
