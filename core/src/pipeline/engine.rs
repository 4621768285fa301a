use std::sync::Arc;
use uuid::Uuid;

use trendstore::{CacheStore, ItemStore, ProcessedItem, Topic, TopicStore, Trend, TrendStore, VectorStore};

use crate::config::{ClusterConfig, DedupConfig, RankerConfig};
use crate::lock::FingerprintLocks;

use super::{Stage, StageError};

/// Why an item did not survive to persistence. `None` means it is still
/// live in the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    ExactDuplicate,
    KeyDuplicate,
    SemanticDuplicate { of: Uuid },
    Failed(String),
}

/// One item's progress through the pipeline. Stages may only ever move an
/// item from live to dropped, never back (spec §4.7 partial-failure
/// policy).
#[derive(Debug, Clone)]
pub struct PipelineItem {
    pub processed: ProcessedItem,
    pub dropped: Option<DropReason>,
    /// Assigned once the Clusterer places this item in a Topic.
    pub topic_id: Option<Uuid>,
}

impl PipelineItem {
    pub fn new(processed: ProcessedItem) -> Self {
        Self {
            processed,
            dropped: None,
            topic_id: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.dropped.is_none()
    }

    pub fn drop_with(&mut self, reason: DropReason) {
        self.dropped = Some(reason);
    }
}

/// Shared state and dependencies threaded through every stage.
pub struct PipelineContext {
    pub run_id: Uuid,
    pub item_store: Arc<dyn ItemStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub cache_store: Arc<dyn CacheStore>,
    pub topic_store: Arc<dyn TopicStore>,
    pub trend_store: Arc<dyn TrendStore>,
    pub locks: Arc<FingerprintLocks>,
    pub dedup: DedupConfig,
    pub cluster: ClusterConfig,
    pub ranker: RankerConfig,

    pub items_collected: u64,
    pub items_deduplicated: u64,
    pub topics_created: u64,
    pub trends_created: u64,

    /// Topic proposals built by the Clusterer/Ranker, written by the
    /// Persister.
    pub topics: Vec<Topic>,
    /// Trend snapshots built by the Ranker, written by the Persister.
    pub trends: Vec<Trend>,
}

impl PipelineContext {
    pub fn new(
        run_id: Uuid,
        item_store: Arc<dyn ItemStore>,
        vector_store: Arc<dyn VectorStore>,
        cache_store: Arc<dyn CacheStore>,
        topic_store: Arc<dyn TopicStore>,
        trend_store: Arc<dyn TrendStore>,
        locks: Arc<FingerprintLocks>,
        dedup: DedupConfig,
        cluster: ClusterConfig,
        ranker: RankerConfig,
    ) -> Self {
        Self {
            run_id,
            item_store,
            vector_store,
            cache_store,
            topic_store,
            trend_store,
            locks,
            dedup,
            cluster,
            ranker,
            items_collected: 0,
            items_deduplicated: 0,
            topics_created: 0,
            trends_created: 0,
            topics: Vec::new(),
            trends: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub items_collected: u64,
    pub items_processed: u64,
    pub items_deduplicated: u64,
    pub topics_created: u64,
    pub trends_created: u64,
}

/// Runs an ordered list of stages over a batch, per spec §4.7/§9.
pub struct PipelineEngine {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineEngine {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Runs every stage in order. A stage returning `Err` aborts the run;
    /// the caller is responsible for marking the PipelineRun `failed`
    /// (spec §4.7: "A stage that throws an uncaught failure aborts the
    /// run").
    pub async fn run(
        &self,
        batch: Vec<ProcessedItem>,
        ctx: &mut PipelineContext,
    ) -> Result<(Vec<PipelineItem>, PipelineOutcome), StageError> {
        ctx.items_collected = batch.len() as u64;
        let mut items: Vec<PipelineItem> = batch.into_iter().map(PipelineItem::new).collect();

        for stage in &self.stages {
            tracing::debug!(stage = stage.name(), batch_len = items.len(), "running stage");
            items = stage.execute(items, ctx).await?;
        }

        let outcome = PipelineOutcome {
            items_collected: ctx.items_collected,
            items_processed: items.iter().filter(|i| i.is_live()).count() as u64,
            items_deduplicated: ctx.items_deduplicated,
            topics_created: ctx.topics_created,
            trends_created: ctx.trends_created,
        };
        Ok((items, outcome))
    }
}
