//! Converter — RawItem to ProcessedItem (spec §4.6).

use chrono::Utc;
use sha2::{Digest, Sha256};
use trendstore::{ItemStatus, ProcessedItem};
use uuid::Uuid;

use crate::domain::RawItem;

/// Fixed namespace for the deterministic item UUID (spec §4.6, §8 property 1).
/// Arbitrary but stable: re-derivable from any build, never regenerated.
const ITEM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3a, 0x1f, 0x6b, 0x2c, 0x9d, 0x44, 0x4e, 0x1a, 0x8f, 0x02, 0x5c, 0x7e, 0xbe, 0x61, 0x0a, 0x9b,
]);

fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_title(raw: &str) -> String {
    collapse_whitespace(strip_html(raw).trim())
}

fn normalize_content(raw: &str) -> String {
    collapse_whitespace(strip_html(raw).trim())
}

pub fn item_id(source: &str, source_id: &str) -> Uuid {
    Uuid::new_v5(&ITEM_NAMESPACE, format!("{source}:{source_id}").as_bytes())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to String never fails");
    }
    out
}

pub fn content_hash(normalized_title: &str, normalized_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_title.to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized_content.to_lowercase().as_bytes());
    to_hex(&hasher.finalize())
}

/// Dimension of the embeddings produced by `embed`.
pub const EMBEDDING_DIM: usize = 32;

/// Deterministic feature-hashed bag-of-trigrams embedding, L2-normalized.
///
/// External embedding providers are out of scope (spec §1 names
/// "translation providers and LLM summarizers" as external collaborators);
/// this stand-in is good enough to exercise the Deduplicator/Clusterer's
/// cosine-similarity machinery deterministically and offline.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBEDDING_DIM];
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.is_empty() {
        return vector;
    }
    let window = 3usize.min(chars.len());
    for i in 0..=chars.len() - window {
        let gram: String = chars[i..i + window].iter().collect();
        let mut hasher = Sha256::new();
        hasher.update(gram.as_bytes());
        let digest = hasher.finalize();
        let bucket = (digest[0] as usize) % EMBEDDING_DIM;
        let sign = if digest[1] % 2 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

/// Converts a RawItem into a ProcessedItem, or `None` if the normalized
/// title is empty (spec §4.6: "Drop items whose normalized title is
/// empty").
pub fn convert(raw: RawItem) -> Option<ProcessedItem> {
    let title = normalize_title(&raw.title);
    if title.is_empty() {
        return None;
    }
    let content = raw.content.as_deref().map(normalize_content).unwrap_or_default();
    let id = item_id(&raw.source, &raw.source_id);
    let hash = content_hash(&title, &content);
    let collected_at = Utc::now();
    let published_at = raw.published_at.unwrap_or(collected_at);
    let now_ms = collected_at.timestamp_millis();

    Some(ProcessedItem {
        id,
        source: raw.source,
        source_id: raw.source_id,
        title,
        content,
        language: "und".to_string(),
        category: None,
        metrics: raw.metrics,
        published_at,
        collected_at,
        content_hash: hash,
        embedding: Some(embed(&format!("{title} {content}"))),
        status: ItemStatus::Pending,
        created_at: now_ms,
        updated_at: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_natural_key_yields_same_id() {
        let a = item_id("rss", "123");
        let b = item_id("rss", "123");
        assert_eq!(a, b);
        let c = item_id("rss", "124");
        assert_ne!(a, c);
    }

    #[test]
    fn identical_title_and_content_hash_equal() {
        let h1 = content_hash("Hello World", "Some Content");
        let h2 = content_hash("hello world", "some content");
        assert_eq!(h1, h2);
    }

    #[test]
    fn empty_title_is_dropped() {
        let raw = RawItem::new("src", "1", "   <b></b>  ");
        assert!(convert(raw).is_none());
    }

    #[test]
    fn strips_html_and_collapses_whitespace() {
        let raw = RawItem::new("src", "1", "<b>Hello</b>   World").with_content("<p>Some   content</p>");
        let item = convert(raw).unwrap();
        assert_eq!(item.title, "Hello World");
        assert_eq!(item.content, "Some content");
    }
}
