//! Progress-callback trait for per-batch extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each batch of pages.
//!
//! # Example
//!
//! ```rust
//! use formschema::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, batch: usize, total_batches: usize, section_count: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Batch {}/{}: {} sections", batch, total_batches, section_count);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each batch.
///
/// Batch numbers are 1-indexed. All methods default to no-ops. With
/// `concurrency > 1` the batch methods may be called from several tasks at
/// once and out of batch order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after batching, before any model call.
    fn on_extraction_start(&self, total_pages: usize, total_batches: usize) {
        let _ = (total_pages, total_batches);
    }

    /// Called just before the model request for a batch is sent.
    fn on_batch_start(&self, batch: usize, total_batches: usize, start_page: usize, page_count: usize) {
        let _ = (batch, total_batches, start_page, page_count);
    }

    /// Called when a batch produced a normalised structure.
    fn on_batch_complete(&self, batch: usize, total_batches: usize, section_count: usize) {
        let _ = (batch, total_batches, section_count);
    }

    /// Called when a batch failed; the job aborts right after.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called once after the merged structure is built.
    fn on_extraction_complete(&self, total_batches: usize, section_count: usize) {
        let _ = (total_batches, section_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
