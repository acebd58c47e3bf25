//! Streaming conversion API: emit results as items complete.
//!
//! Crawls and transcriptions can take minutes. [`convert_stream`] lets a
//! caller show each result as soon as its item finishes instead of waiting
//! for the whole batch and the archive.
//!
//! Results arrive in completion order, tagged with their request index.
//! Sort by the index if order matters. No archive is built and the progress
//! callback is not invoked; use [`crate::convert::Orchestrator::run_batch`]
//! for that.

use crate::convert::Orchestrator;
use crate::error::BatchError;
use crate::output::ConversionResult;
use crate::pipeline::input::{resolve_batch, BatchInput};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A boxed stream of `(request index, result)` pairs.
pub type ResultStream = Pin<Box<dyn Stream<Item = (usize, ConversionResult)> + Send>>;

/// Resolve `input` and stream one result per item as each completes.
///
/// # Returns
/// - `Ok(ResultStream)`: exactly one pair per item; item faults arrive as
///   failed results, never as stream errors
/// - `Err(BatchError)`: the batch could not be formed (empty or malformed
///   item)
///
/// # Example
/// ```rust,no_run
/// use edgequake_batch2md::{convert_stream, BatchConfig, BatchInput, ConverterRegistry, ItemDescriptor, Orchestrator};
/// use futures::StreamExt;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(Arc::new(ConverterRegistry::with_builtins()), BatchConfig::default());
/// let input = BatchInput::new(vec![ItemDescriptor::text("a.txt", "hello")]);
/// let mut results = convert_stream(&orchestrator, input, CancellationToken::new()).await?;
/// while let Some((index, result)) = results.next().await {
///     println!("#{index} {} ok={}", result.name(), result.is_success());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(
    orchestrator: &Orchestrator,
    input: BatchInput,
    cancel: CancellationToken,
) -> Result<ResultStream, BatchError> {
    let requests = resolve_batch(input, orchestrator.config()).await?;
    let concurrency = orchestrator.config().concurrency.max(1);
    info!("Streaming {} items (concurrency {})", requests.len(), concurrency);

    let orchestrator = orchestrator.clone();
    let s = stream::iter(requests.into_iter().enumerate().map(move |(index, request)| {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        async move { (index, orchestrator.convert_one(request, &cancel).await) }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
