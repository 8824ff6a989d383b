//! Progress events for the chunked pipeline.
//!
//! Inject an [`Arc<dyn ChunkProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to follow a
//! split conversion chunk by chunk. The CLI uses this to drive its
//! `indicatif` bar; library callers can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use mistral_ocr::{ChunkProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ChunkProgressCallback for Counter {
//!     fn on_chunk_complete(&self, ordinal: usize, total: usize, markdown_len: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("chunk {ordinal}/{total} done ({markdown_len} bytes), {done} so far");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Receives chunk lifecycle events.
///
/// With `concurrency > 1` the per-chunk methods may be called from several
/// tasks at once, so shared state needs atomics or a lock. Every method
/// defaults to a no-op.
pub trait ChunkProgressCallback: Send + Sync {
    /// Called once after splitting, before any chunk is submitted.
    fn on_pipeline_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called when an outer attempt for a chunk begins.
    ///
    /// * `ordinal`: 1-based chunk number
    /// * `attempt`: 1-based outer attempt number
    fn on_chunk_start(&self, ordinal: usize, total_chunks: usize, attempt: u32) {
        let _ = (ordinal, total_chunks, attempt);
    }

    /// Called before sleeping ahead of another outer attempt.
    fn on_chunk_retry(&self, ordinal: usize, next_attempt: u32, delay: Duration) {
        let _ = (ordinal, next_attempt, delay);
    }

    /// Called when a chunk converts successfully.
    fn on_chunk_complete(&self, ordinal: usize, total_chunks: usize, markdown_len: usize) {
        let _ = (ordinal, total_chunks, markdown_len);
    }

    /// Called when a chunk has exhausted every outer attempt.
    fn on_chunk_error(&self, ordinal: usize, total_chunks: usize, error: &str) {
        let _ = (ordinal, total_chunks, error);
    }

    /// Called once after every chunk reached a terminal state.
    fn on_pipeline_complete(&self, total_chunks: usize, success_count: usize) {
        let _ = (total_chunks, success_count);
    }
}

/// Ignores every event.
pub struct NoopProgressCallback;

impl ChunkProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ChunkProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        starts: AtomicUsize,
        retries: Mutex<Vec<(usize, u32)>>,
        errors: Mutex<Vec<usize>>,
        succeeded: AtomicUsize,
    }

    impl ChunkProgressCallback for Recorder {
        fn on_chunk_start(&self, _ordinal: usize, _total: usize, _attempt: u32) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chunk_retry(&self, ordinal: usize, next_attempt: u32, _delay: Duration) {
            self.retries.lock().unwrap().push((ordinal, next_attempt));
        }

        fn on_chunk_error(&self, ordinal: usize, _total: usize, _error: &str) {
            self.errors.lock().unwrap().push(ordinal);
        }

        fn on_pipeline_complete(&self, _total: usize, success_count: usize) {
            self.succeeded.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_pipeline_start(4);
        cb.on_chunk_start(1, 4, 1);
        cb.on_chunk_retry(1, 2, Duration::from_secs(2));
        cb.on_chunk_complete(1, 4, 120);
        cb.on_chunk_error(2, 4, "HTTP 503");
        cb.on_pipeline_complete(4, 3);
    }

    #[test]
    fn recorder_sees_overridden_events() {
        let rec = Recorder::default();
        rec.on_chunk_start(1, 2, 1);
        rec.on_chunk_retry(1, 2, Duration::from_secs(2));
        rec.on_chunk_start(1, 2, 2);
        rec.on_chunk_error(1, 2, "boom");
        rec.on_chunk_start(2, 2, 1);
        rec.on_chunk_complete(2, 2, 10);
        rec.on_pipeline_complete(2, 1);

        assert_eq!(rec.starts.load(Ordering::SeqCst), 3);
        assert_eq!(*rec.retries.lock().unwrap(), vec![(1, 2)]);
        assert_eq!(*rec.errors.lock().unwrap(), vec![1]);
        assert_eq!(rec.succeeded.load(Ordering::SeqCst), 1);
    }
}
