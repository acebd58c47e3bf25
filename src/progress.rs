//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the orchestrator works through a batch.
//!
//! # Percent semantics
//!
//! [`BatchProgressCallback::on_progress`] receives
//! `floor(completed / total * 100)` after each item. Items complete
//! concurrently, so two calls may arrive out of order; the orchestrator
//! therefore only reports values below 100 from inside the workers and sends
//! exactly one `100` after every item has finished, failed ones included.
//!
//! # Example
//!
//! ```rust
//! use edgequake_batch2md::{BatchConfig, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl BatchProgressCallback for LastPercent {
//!     fn on_progress(&self, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(LastPercent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each item.
///
/// Implementations must be `Send + Sync`; item events may be delivered
/// concurrently from several tasks. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any item starts.
    fn on_batch_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before an item is dispatched.
    ///
    /// # Arguments
    /// * `index`: 0-based position in the batch
    /// * `name` : the request's display name
    fn on_item_start(&self, index: usize, total_items: usize, name: &str) {
        let _ = (index, total_items, name);
    }

    /// Called when an item converts successfully.
    fn on_item_complete(&self, index: usize, total_items: usize, markdown_len: usize) {
        let _ = (index, total_items, markdown_len);
    }

    /// Called when an item fails for any reason.
    fn on_item_error(&self, index: usize, total_items: usize, error: &str) {
        let _ = (index, total_items, error);
    }

    /// Completion percentage, rounded down. The last call is always `100`.
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// Called once after every item has been attempted.
    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let _ = (total_items, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

/// `floor(completed / total * 100)`, saturating at 100.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) * 100) / total) as u8
}
