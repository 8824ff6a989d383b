//! Chunked conversion of large PDFs.
//!
//! ```text
//! Document ──split──▶ [chunk 1, chunk 2, …, chunk N]
//!                        │ buffer_unordered(concurrency)
//!                        ▼
//!               per chunk: up to chunk_retries + 1 outer attempts
//!                          (linear wait), each a submit + extract
//!                          under the inner exponential RetryPolicy
//!                        │
//!                        ▼
//!               ordinal-indexed slots ──▶ PipelineOutcome
//! ```
//!
//! A failed chunk never aborts the run; it is recorded as a
//! [`ChunkError`] and the remaining chunks keep going. Only splitting
//! failures are fatal.

use crate::config::ConversionConfig;
use crate::convert::{resolve_splitter, SingleShotConverter};
use crate::error::{ChunkError, OcrError};
use crate::output::{ChunkOutput, PipelineOutcome, PipelineStatus};
use crate::pipeline::input::Document;
use crate::pipeline::split::{Chunk, DocumentSplitter};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Lifecycle of a single chunk.
///
/// `Submitting` and `Processing` may repeat across outer attempts;
/// `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Submitting,
    Processing,
    Succeeded,
    Failed,
}

impl ChunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkState::Succeeded | ChunkState::Failed)
    }

    pub fn can_transition_to(self, next: ChunkState) -> bool {
        use ChunkState::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (Pending, Submitting) => true,
            (Submitting, Submitting | Processing | Failed) => true,
            (Processing, Submitting | Succeeded | Failed) => true,
            _ => false,
        }
    }
}

/// Tracks one chunk's state, logging every transition.
struct ChunkTracker {
    ordinal: usize,
    state: ChunkState,
}

impl ChunkTracker {
    fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            state: ChunkState::Pending,
        }
    }

    fn enter(&mut self, next: ChunkState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "chunk {}: illegal transition {:?} -> {:?}",
            self.ordinal,
            self.state,
            next
        );
        debug!("Chunk {}: {:?} -> {:?}", self.ordinal, self.state, next);
        self.state = next;
    }
}

/// Splits a document, converts every chunk independently and merges the results.
pub struct ChunkedPipeline {
    splitter: Arc<dyn DocumentSplitter>,
    converter: SingleShotConverter,
    chunk_count: usize,
    chunk_retries: u32,
    chunk_retry_delay: Duration,
    concurrency: usize,
    chunk_output_dir: Option<PathBuf>,
    progress: Option<ProgressCallback>,
}

impl ChunkedPipeline {
    /// A sequential pipeline with the default budgets (100 chunks, 2 outer
    /// retries 2 s apart).
    pub fn new(splitter: Arc<dyn DocumentSplitter>, converter: SingleShotConverter) -> Self {
        let defaults = ConversionConfig::default();
        Self {
            splitter,
            converter,
            chunk_count: defaults.chunk_count,
            chunk_retries: defaults.chunk_retries,
            chunk_retry_delay: defaults.chunk_retry_delay(),
            concurrency: defaults.concurrency,
            chunk_output_dir: None,
            progress: None,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Result<Self, OcrError> {
        let mut pipeline = Self::new(resolve_splitter(config), SingleShotConverter::from_config(config)?)
            .with_chunk_count(config.chunk_count)
            .with_chunk_retries(config.chunk_retries, config.chunk_retry_delay())
            .with_concurrency(config.concurrency);
        pipeline.chunk_output_dir = config.chunk_output_dir.clone();
        pipeline.progress = config.progress_callback.clone();
        Ok(pipeline)
    }

    pub fn with_chunk_count(mut self, n: usize) -> Self {
        self.chunk_count = n;
        self
    }

    /// Outer attempts after the first, and the linear delay unit between them.
    pub fn with_chunk_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.chunk_retries = retries;
        self.chunk_retry_delay = delay;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_chunk_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunk_output_dir = Some(dir.into());
        self
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Split `document` and convert every chunk.
    ///
    /// Returns `Ok` even when chunks failed; inspect
    /// [`PipelineOutcome::status`]. Errors only when splitting fails or the
    /// chunk output directory cannot be created.
    pub async fn run(&self, document: &Document) -> Result<PipelineOutcome, OcrError> {
        let start = Instant::now();
        let chunks = self.splitter.split(document, self.chunk_count).await?;
        let total = chunks.len();
        info!(
            "Processing '{}' as {} chunks (concurrency {})",
            document.name, total, self.concurrency
        );

        if let Some(ref dir) = self.chunk_output_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| OcrError::write_failed(dir, e))?;
        }
        if let Some(ref cb) = self.progress {
            cb.on_pipeline_start(total);
        }

        // Completion order is arbitrary under concurrency; slots restore ordinal order.
        let mut slots: Vec<Option<Result<ChunkOutput, ChunkError>>> = (0..total).map(|_| None).collect();
        let mut results = stream::iter(chunks.iter().map(|chunk| self.process_chunk(chunk)))
            .buffer_unordered(self.concurrency);
        while let Some((ordinal, result)) = results.next().await {
            if let Some(slot) = slots.get_mut(ordinal - 1) {
                *slot = Some(result);
            }
        }
        drop(results);

        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for (i, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(output)) => outputs.push(output),
                Some(Err(e)) => failures.push(e),
                None => failures.push(ChunkError::Failed {
                    ordinal: i + 1,
                    attempts: 0,
                    detail: "chunk was never processed".into(),
                }),
            }
        }

        let outcome = PipelineOutcome {
            outputs,
            failures,
            total_chunks: total,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        match outcome.status() {
            PipelineStatus::Complete => info!(
                "All {} chunks of '{}' converted in {}ms",
                total, document.name, outcome.duration_ms
            ),
            PipelineStatus::Partial => warn!(
                "{}/{} chunks of '{}' failed: {:?}. Output is incomplete.",
                outcome.failures.len(),
                total,
                document.name,
                outcome.failed_ordinals()
            ),
            PipelineStatus::Failed => warn!("Every chunk of '{}' failed", document.name),
        }
        if let Some(ref cb) = self.progress {
            cb.on_pipeline_complete(total, outcome.outputs.len());
        }

        Ok(outcome)
    }

    async fn process_chunk(&self, chunk: &Chunk) -> (usize, Result<ChunkOutput, ChunkError>) {
        let max_attempts = self.chunk_retries.saturating_add(1);
        let mut tracker = ChunkTracker::new(chunk.ordinal);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.chunk_retry_delay * (attempt - 1);
                warn!(
                    "Chunk {}/{}: attempt {} failed, retrying in {:.1}s",
                    chunk.ordinal,
                    chunk.total,
                    attempt - 1,
                    delay.as_secs_f64()
                );
                if let Some(ref cb) = self.progress {
                    cb.on_chunk_retry(chunk.ordinal, attempt, delay);
                }
                sleep(delay).await;
            }

            if let Some(ref cb) = self.progress {
                cb.on_chunk_start(chunk.ordinal, chunk.total, attempt);
            }
            tracker.enter(ChunkState::Submitting);
            let reference = match self.converter.submit(&chunk.document).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            tracker.enter(ChunkState::Processing);
            match self.converter.extract(&chunk.document, &reference).await {
                Ok(response) => {
                    tracker.enter(ChunkState::Succeeded);
                    let markdown = response.combined_markdown();
                    self.persist_chunk(chunk, &markdown).await;
                    if let Some(ref cb) = self.progress {
                        cb.on_chunk_complete(chunk.ordinal, chunk.total, markdown.len());
                    }
                    return (
                        chunk.ordinal,
                        Ok(ChunkOutput {
                            ordinal: chunk.ordinal,
                            pages: chunk.pages.clone(),
                            markdown,
                            attempts: attempt,
                        }),
                    );
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        tracker.enter(ChunkState::Failed);
        warn!(
            "Chunk {}/{} failed after {} attempts: {}",
            chunk.ordinal, chunk.total, max_attempts, last_error
        );
        if let Some(ref cb) = self.progress {
            cb.on_chunk_error(chunk.ordinal, chunk.total, &last_error);
        }
        (
            chunk.ordinal,
            Err(ChunkError::Failed {
                ordinal: chunk.ordinal,
                attempts: max_attempts,
                detail: last_error,
            }),
        )
    }

    /// Write a chunk's Markdown as soon as it succeeds. Failure here is
    /// logged and does not fail the chunk.
    async fn persist_chunk(&self, chunk: &Chunk, markdown: &str) {
        let Some(ref dir) = self.chunk_output_dir else {
            return;
        };
        let path = dir.join(format!("{}.md", chunk.document.name));
        match tokio::fs::write(&path, markdown).await {
            Ok(()) => debug!("Saved chunk {} to {}", chunk.ordinal, path.display()),
            Err(e) => warn!("Could not save chunk {} to {}: {}", chunk.ordinal, path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_transition() {
        for next in [
            ChunkState::Pending,
            ChunkState::Submitting,
            ChunkState::Processing,
            ChunkState::Succeeded,
            ChunkState::Failed,
        ] {
            assert!(!ChunkState::Succeeded.can_transition_to(next));
            assert!(!ChunkState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn happy_and_retry_paths_are_legal() {
        use ChunkState::*;
        assert!(Pending.can_transition_to(Submitting));
        assert!(Submitting.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Succeeded));
        // A failed attempt goes back to submitting.
        assert!(Processing.can_transition_to(Submitting));
        assert!(Submitting.can_transition_to(Submitting));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Submitting.can_transition_to(Succeeded));
    }

    #[test]
    fn terminal_flags() {
        assert!(ChunkState::Succeeded.is_terminal());
        assert!(ChunkState::Failed.is_terminal());
        assert!(!ChunkState::Processing.is_terminal());
    }
}
