use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{PipelineContext, PipelineItem, Stage, StageError};

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// A cluster built up incrementally during assignment.
struct ClusterBuilder {
    id: Uuid,
    members: Vec<usize>,
    centroid: Vec<f32>,
}

impl ClusterBuilder {
    fn recompute_centroid(&mut self, embeddings: &[Vec<f32>]) {
        let dim = self.centroid.len();
        let mut sum = vec![0f32; dim];
        for &idx in &self.members {
            for (i, v) in embeddings[idx].iter().enumerate() {
                sum[i] += v;
            }
        }
        let n = self.members.len().max(1) as f32;
        for v in sum.iter_mut() {
            *v /= n;
        }
        self.centroid = sum;
    }
}

/// Density-based clustering over surviving items combined with a recall
/// window of recently stored items (spec §4.7). Implemented as greedy
/// single-pass centroid assignment: deterministic, cheap, and matches the
/// spec's documented tie-break (lower cluster UUID wins when an item is
/// equidistant between two clusters within the configured threshold).
pub struct Clusterer;

#[async_trait]
impl Stage for Clusterer {
    fn name(&self) -> &'static str {
        "clusterer"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        let since = Utc::now() - chrono::Duration::hours(ctx.cluster.recall_window_hours);
        let until = Utc::now();
        // Open Question resolution (spec §9): fresh (this-run) items are
        // included in the recall set before Ranker runs.
        let recall = ctx
            .item_store
            .list_within_window(since, until, 5000, 0)
            .await?;

        let mut embeddings: Vec<Vec<f32>> = Vec::new();
        let mut owners: Vec<Option<usize>> = Vec::new(); // index into `batch`, if a live batch item

        for (i, item) in batch.iter().enumerate() {
            if item.is_live() {
                if let Some(e) = &item.processed.embedding {
                    embeddings.push(e.clone());
                    owners.push(Some(i));
                }
            }
        }
        for recalled in &recall {
            if let Some(e) = &recalled.embedding {
                embeddings.push(e.clone());
                owners.push(None);
            }
        }

        let mut clusters: Vec<ClusterBuilder> = Vec::new();

        for idx in 0..embeddings.len() {
            let mut best: Option<(usize, f64)> = None;
            for (ci, cluster) in clusters.iter().enumerate() {
                let sim = cosine(&embeddings[idx], &cluster.centroid);
                if sim >= ctx.cluster.threshold {
                    match best {
                        Some((_, best_sim)) if sim < best_sim => {}
                        Some((best_ci, best_sim)) if (sim - best_sim).abs() < 1e-9 => {
                            if clusters[ci].id < clusters[best_ci].id {
                                best = Some((ci, sim));
                            }
                        }
                        _ => best = Some((ci, sim)),
                    }
                }
            }

            match best {
                Some((ci, _)) => {
                    clusters[ci].members.push(idx);
                    clusters[ci].recompute_centroid(&embeddings);
                }
                None => {
                    clusters.push(ClusterBuilder {
                        id: Uuid::now_v7(),
                        members: vec![idx],
                        centroid: embeddings[idx].clone(),
                    });
                }
            }
        }

        for cluster in clusters.into_iter().filter(|c| c.members.len() >= ctx.cluster.min_cluster_size) {
            for &idx in &cluster.members {
                if let Some(batch_idx) = owners[idx] {
                    batch[batch_idx].topic_id = Some(cluster.id);
                }
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }
}
