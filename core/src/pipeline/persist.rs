use async_trait::async_trait;

use trendstore::{ItemStatus, VectorMeta};

use super::{PipelineContext, PipelineItem, Stage, StageError};

/// Writes survivors to the storage facade: items to `ItemStore`, embeddings
/// to `VectorStore`, Topics/Trends to the relational store, and invalidates
/// any CacheStore entries keyed by affected categories (spec §4.7, §4.8).
///
/// A `VectorStore` write failure does not abort the run: the item is left
/// in `ItemStatus::VectorPending` so a later pass can retry it (spec §5
/// property 9, two-phase write reconciliation).
pub struct Persister;

#[async_trait]
impl Stage for Persister {
    fn name(&self) -> &'static str {
        "persister"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        let mut touched_categories: std::collections::HashSet<String> = std::collections::HashSet::new();

        for item in batch.iter_mut().filter(|i| i.is_live()) {
            let mut processed = item.processed.clone();

            match ctx.item_store.insert(&processed).await {
                Ok(()) => {}
                Err(trendstore::StorageError::Conflict(_)) => {
                    // Another run already persisted this natural key; treat as
                    // already-written rather than aborting the batch.
                }
                Err(err) => return Err(err.into()),
            }

            if let Some(embedding) = &processed.embedding {
                let meta = VectorMeta {
                    language: processed.language.clone(),
                    category: processed.category.clone(),
                    published_at: processed.published_at,
                    collected_at: processed.collected_at,
                };
                match ctx.vector_store.upsert(processed.id, embedding.clone(), meta).await {
                    Ok(()) => {
                        processed.status = ItemStatus::Processed;
                        ctx.item_store.set_status(processed.id, ItemStatus::Processed).await?;
                    }
                    Err(err) => {
                        tracing::warn!(item = %processed.id, error = %err, "vector upsert failed, marking vector_pending");
                        processed.status = ItemStatus::VectorPending;
                        ctx.item_store.set_status(processed.id, ItemStatus::VectorPending).await?;
                    }
                }
            }

            if let Some(category) = &processed.category {
                touched_categories.insert(category.clone());
            }
            item.processed = processed;
        }

        for topic in &ctx.topics {
            let item_ids: Vec<uuid::Uuid> = batch
                .iter()
                .filter(|i| i.is_live() && i.topic_id == Some(topic.id))
                .map(|i| i.processed.id)
                .collect();
            ctx.topic_store.upsert(topic, &item_ids).await?;
            if let Some(category) = &topic.category {
                touched_categories.insert(category.clone());
            }
        }

        for trend in &ctx.trends {
            ctx.trend_store.insert(trend).await?;
        }

        for category in touched_categories {
            let key = format!("trending:{category}");
            if let Err(err) = ctx.cache_store.del(&key).await {
                tracing::warn!(%key, error = %err, "cache invalidation failed");
            }
        }

        Ok(batch)
    }
}
