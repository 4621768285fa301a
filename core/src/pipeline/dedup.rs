use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;

use trendstore::VectorFilter;

use super::{DropReason, PipelineContext, PipelineItem, Stage, StageError};

/// Three-level dedup cascade: exact content-hash, natural key, then
/// semantic similarity over the VectorStore (spec §4.7).
pub struct Deduplicator;

#[async_trait]
impl Stage for Deduplicator {
    fn name(&self) -> &'static str {
        "deduplicator"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        // A single collect() batch can itself contain duplicates (spec §8
        // S2: "plugin returns A, A, B"); nothing has been persisted yet for
        // those, so the ItemStore lookups below would miss them. Track
        // hashes/keys seen earlier in this same batch alongside the store.
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut seen_keys: HashSet<(String, String)> = HashSet::new();

        for item in batch.iter_mut().filter(|i| i.is_live()) {
            let p = &item.processed;
            // Fingerprint lock: (content hash, source:source_id) must be held
            // before the first write, so two concurrent runs can't both
            // insert the same content (spec §4.7, §5).
            let fingerprint = format!("{}|{}:{}", p.content_hash, p.source, p.source_id);
            let _guard = ctx.locks.acquire(&fingerprint).await;

            // (1) Exact dedup by content_hash.
            if seen_hashes.contains(&p.content_hash)
                || ctx.item_store.get_by_content_hash(&p.content_hash).await?.is_some()
            {
                item.drop_with(DropReason::ExactDuplicate);
                ctx.items_deduplicated += 1;
                continue;
            }

            // (2) Key dedup by natural key.
            let key = (p.source.clone(), p.source_id.clone());
            if seen_keys.contains(&key)
                || ctx
                    .item_store
                    .get_by_natural_key(&p.source, &p.source_id)
                    .await?
                    .is_some()
            {
                item.drop_with(DropReason::KeyDuplicate);
                ctx.items_deduplicated += 1;
                continue;
            }

            seen_hashes.insert(p.content_hash.clone());
            seen_keys.insert(key);

            // (3) Semantic dedup over the recent, same-language window.
            let Some(embedding) = p.embedding.as_ref() else {
                continue;
            };
            let since = Utc::now() - chrono::Duration::days(ctx.dedup.lookback_days);
            let filter = VectorFilter {
                language: Some(p.language.clone()),
                since: Some(since),
            };
            let matches = ctx.vector_store.knn(embedding, 5, &filter).await?;

            // Tie-break: highest similarity, then most recent published_at —
            // the VectorStore's knn already orders by both, so the first
            // match above threshold is the winner.
            if let Some(best) = matches
                .iter()
                .find(|m| m.similarity >= ctx.dedup.semantic_threshold)
            {
                item.drop_with(DropReason::SemanticDuplicate { of: best.id });
                ctx.items_deduplicated += 1;
            }
        }
        Ok(batch)
    }
}
