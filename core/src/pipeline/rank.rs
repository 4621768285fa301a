use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use trendstore::{ProcessedItem, Topic, Trend, TrendState};

use super::{PipelineContext, PipelineItem, Stage, StageError};

const DEAD_FLOOR: f64 = 0.05;
const SUSTAINED_MIN_RUNS: usize = 3;
const SUSTAINED_BAND: f64 = 0.20;
const DECLINE_DROP: f64 = 0.40;

fn most_common<'a>(values: impl Iterator<Item = &'a Option<String>>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.flatten() {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, c)| *c).map(|(k, _)| k.to_string())
}

fn extract_keywords(items: &[&ProcessedItem]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        for word in item.title.split_whitespace() {
            let w: String = word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
            if w.len() > 3 {
                *counts.entry(w).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(8).map(|(w, _)| w).collect()
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn derive_state(score: f64, velocity: f64, history: &[Trend], p90_velocity: f64) -> TrendState {
    if history.is_empty() {
        return TrendState::Emerging;
    }
    if p90_velocity > 0.0 && velocity > p90_velocity {
        return TrendState::Viral;
    }
    let peak = history.iter().map(|t| t.score).fold(score, f64::max);
    if history.len() + 1 >= SUSTAINED_MIN_RUNS && peak > 0.0 && ((score - peak).abs() / peak) <= SUSTAINED_BAND {
        return TrendState::Sustained;
    }
    if peak > 0.0 && score < peak * (1.0 - DECLINE_DROP) {
        return TrendState::Declining;
    }
    if score < DEAD_FLOOR {
        return TrendState::Dead;
    }
    TrendState::Sustained
}

struct Candidate {
    topic: Topic,
    history: Vec<Trend>,
    member_indices: Vec<usize>,
    score: f64,
    velocity: f64,
}

/// Scores Topic proposals and assigns dense, category-diverse ranks
/// (spec §4.7).
pub struct Ranker;

#[async_trait]
impl Stage for Ranker {
    fn name(&self) -> &'static str {
        "ranker"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        let mut groups: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (i, item) in batch.iter().enumerate() {
            if item.is_live() {
                if let Some(tid) = item.topic_id {
                    groups.entry(tid).or_default().push(i);
                }
            }
        }

        let now = Utc::now();
        let mut candidates = Vec::new();

        for (cluster_id, idxs) in groups {
            let items: Vec<&ProcessedItem> = idxs.iter().map(|&i| &batch[i].processed).collect();
            let rep = items
                .iter()
                .max_by(|a, b| a.engagement_total().partial_cmp(&b.engagement_total()).unwrap())
                .expect("cluster group is non-empty");

            let mut sources: Vec<String> = items.iter().map(|i| i.source.clone()).collect();
            sources.sort();
            sources.dedup();

            let mut engagement: HashMap<String, f64> = HashMap::new();
            for item in &items {
                for (k, v) in &item.metrics {
                    *engagement.entry(k.clone()).or_insert(0.0) += v;
                }
            }

            let first_seen = items.iter().map(|i| i.collected_at).min().unwrap_or(now);
            let last_updated = items.iter().map(|i| i.collected_at).max().unwrap_or(now);
            let category = most_common(items.iter().map(|i| &i.category));

            let existing = ctx.topic_store.find_by_title(&rep.title).await?;
            let topic_id = existing.as_ref().map(|t| t.id).unwrap_or(cluster_id);
            let first_seen = existing.as_ref().map(|t| t.first_seen).unwrap_or(first_seen);
            let created_at = existing.as_ref().map(|t| t.created_at).unwrap_or(now.timestamp_millis());

            let topic = Topic {
                id: topic_id,
                title: rep.title.clone(),
                summary: rep.content.chars().take(280).collect(),
                category,
                language: rep.language.clone(),
                sources,
                item_count: items.len(),
                keywords: extract_keywords(&items),
                engagement,
                first_seen,
                last_updated,
                created_at,
                updated_at: now.timestamp_millis(),
            };

            let history = ctx.trend_store.history_for_topic(topic_id, 10).await?;
            candidates.push((topic, history, idxs));
        }

        let totals: Vec<f64> = candidates.iter().map(|(t, _, _)| t.engagement.values().sum()).collect();
        let n = totals.len().max(1) as f64;
        let mean = totals.iter().sum::<f64>() / n;
        let variance = totals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        let mut scored: Vec<Candidate> = candidates
            .into_iter()
            .map(|(topic, history, member_indices)| {
                let total = topic.engagement.values().sum::<f64>();
                let engagement_z = if stddev > 0.0 { (total - mean) / stddev } else { 0.0 };
                let velocity = history
                    .first()
                    .map(|prev| (total - prev.engagement.values().sum::<f64>()).max(0.0))
                    .unwrap_or(0.0);
                let age_hours = (now - topic.last_updated).num_seconds() as f64 / 3600.0;
                let freshness = (-age_hours.max(0.0) / ctx.ranker.tau_hours).exp();
                let days_since_first_seen = (now - topic.first_seen).num_seconds() as f64 / 86400.0;
                let age_penalty = (1.0 + days_since_first_seen.max(0.0)).ln();
                let w = &ctx.ranker.weights;
                let score = w.engagement * engagement_z + w.velocity * velocity + w.freshness * freshness
                    - w.age * age_penalty;
                Candidate { topic, history, member_indices, score, velocity }
            })
            .collect();

        let mut velocities: Vec<f64> = scored.iter().map(|c| c.velocity).collect();
        velocities.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p90_velocity = percentile(&velocities, 0.90);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| b.velocity.partial_cmp(&a.velocity).unwrap())
                .then_with(|| a.topic.first_seen.cmp(&b.topic.first_seen))
        });

        let mut top: Vec<Candidate> = Vec::new();
        let mut rest: Vec<Candidate> = Vec::new();
        let mut category_counts: HashMap<Option<String>, usize> = HashMap::new();
        for candidate in scored {
            if top.len() < ctx.ranker.top_n {
                let count = category_counts.entry(candidate.topic.category.clone()).or_insert(0);
                if *count < ctx.ranker.diversity_cap {
                    *count += 1;
                    top.push(candidate);
                    continue;
                }
            }
            rest.push(candidate);
        }
        top.extend(rest);

        for (rank_idx, candidate) in top.into_iter().enumerate() {
            let rank = (rank_idx + 1) as u32;
            let state = derive_state(candidate.score, candidate.velocity, &candidate.history, p90_velocity);
            let peak_engagement_at = match candidate.history.iter().map(|t| t.score).fold(f64::MIN, f64::max) {
                peak if candidate.score >= peak => Some(now),
                _ => candidate.history.first().and_then(|t| t.peak_engagement_at),
            };

            for &idx in &candidate.member_indices {
                batch[idx].topic_id = Some(candidate.topic.id);
            }

            let trend = Trend {
                id: Uuid::now_v7(),
                topic_id: candidate.topic.id,
                run_id: ctx.run_id,
                rank,
                title: candidate.topic.title.clone(),
                summary: candidate.topic.summary.clone(),
                score: candidate.score,
                velocity: candidate.velocity,
                state,
                category: candidate.topic.category.clone(),
                language: candidate.topic.language.clone(),
                keywords: candidate.topic.keywords.clone(),
                engagement: candidate.topic.engagement.clone(),
                first_seen: candidate.topic.first_seen,
                last_updated: candidate.topic.last_updated,
                peak_engagement_at,
                created_at: now.timestamp_millis(),
                updated_at: now.timestamp_millis(),
            };

            ctx.topics_created += 1;
            ctx.trends_created += 1;
            ctx.topics.push(candidate.topic);
            ctx.trends.push(trend);
        }

        Ok(batch)
    }
}
