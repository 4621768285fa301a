//! Pipeline Engine & Stages (spec §4.7).
//!
//! Each stage conforms to a single `execute(batch, ctx) -> batch` interface
//! and the engine runs them via a loop it owns (spec §9 "Pipeline
//! composition"), rather than decorators or chained closures.

mod cluster;
mod dedup;
mod engine;
mod language;
mod normalizer;
mod persist;
mod rank;

pub use cluster::Clusterer;
pub use dedup::Deduplicator;
pub use engine::{DropReason, PipelineContext, PipelineEngine, PipelineItem, PipelineOutcome};
pub use language::LanguageDetector;
pub use normalizer::Normalizer;
pub use persist::Persister;
pub use rank::Ranker;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("storage error: {0}")]
    Storage(#[from] trendstore::StorageError),
    #[error("stage aborted: {0}")]
    Aborted(String),
}

/// A single pipeline stage. Stages are idempotent on re-run over the same
/// batch and must preserve item order except where they explicitly drop
/// items (spec §5).
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(
        &self,
        batch: Vec<PipelineItem>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError>;
}
