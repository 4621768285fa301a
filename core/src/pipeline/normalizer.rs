use async_trait::async_trait;

use crate::convert::{content_hash, embed};

use super::{PipelineContext, PipelineItem, Stage, StageError};

/// Re-enforces the Converter's normalization invariants for items that
/// bypassed the Scheduler path, e.g. items re-read from ItemStore for
/// reprocessing (spec §4.7).
pub struct Normalizer;

#[async_trait]
impl Stage for Normalizer {
    fn name(&self) -> &'static str {
        "normalizer"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        _ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        for item in batch.iter_mut().filter(|i| i.is_live()) {
            let p = &mut item.processed;
            let title: String = p.title.split_whitespace().collect::<Vec<_>>().join(" ");
            let content: String = p.content.split_whitespace().collect::<Vec<_>>().join(" ");
            p.title = title;
            p.content = content;
            p.content_hash = content_hash(&p.title, &p.content);
            if p.embedding.is_none() {
                p.embedding = Some(embed(&format!("{} {}", p.title, p.content)));
            }
        }
        Ok(batch)
    }
}
