use async_trait::async_trait;

use super::{PipelineContext, PipelineItem, Stage, StageError};

/// Minimum normalized-text length below which detection is skipped and the
/// item is tagged `und` (spec §4.7).
const MIN_DETECTABLE_LEN: usize = 12;

/// Assigns an IETF BCP-47 short language tag using a character-script
/// histogram. Deterministic for a given input, per spec §4.7's contract;
/// a full statistical n-gram model is out of scope (see DESIGN.md).
pub struct LanguageDetector;

fn detect(text: &str) -> &'static str {
    if text.chars().filter(|c| !c.is_whitespace()).count() < MIN_DETECTABLE_LEN {
        return "und";
    }

    let mut latin = 0u32;
    let mut cyrillic = 0u32;
    let mut han = 0u32;
    let mut hiragana_katakana = 0u32;
    let mut hangul = 0u32;
    let mut arabic = 0u32;
    let mut devanagari = 0u32;

    for c in text.chars() {
        let cp = c as u32;
        match cp {
            0x0041..=0x024F => latin += 1,
            0x0400..=0x04FF => cyrillic += 1,
            0x4E00..=0x9FFF => han += 1,
            0x3040..=0x30FF => hiragana_katakana += 1,
            0xAC00..=0xD7A3 => hangul += 1,
            0x0600..=0x06FF => arabic += 1,
            0x0900..=0x097F => devanagari += 1,
            _ => {}
        }
    }

    let scores: [(u32, &'static str); 7] = [
        (latin, "en"),
        (cyrillic, "ru"),
        (han, "zh"),
        (hiragana_katakana, "ja"),
        (hangul, "ko"),
        (arabic, "ar"),
        (devanagari, "hi"),
    ];

    scores
        .iter()
        .max_by_key(|(count, _)| *count)
        .filter(|(count, _)| *count > 0)
        .map(|(_, lang)| *lang)
        .unwrap_or("und")
}

#[async_trait]
impl Stage for LanguageDetector {
    fn name(&self) -> &'static str {
        "language_detector"
    }

    async fn execute(
        &self,
        mut batch: Vec<PipelineItem>,
        _ctx: &mut PipelineContext,
    ) -> Result<Vec<PipelineItem>, StageError> {
        for item in batch.iter_mut().filter(|i| i.is_live()) {
            let text = format!("{} {}", item.processed.title, item.processed.content);
            item.processed.language = detect(&text).to_string();
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_deterministic() {
        let text = "This is a reasonably long piece of English text for detection.";
        assert_eq!(detect(text), detect(text));
    }

    #[test]
    fn short_text_is_undetermined() {
        assert_eq!(detect("hi"), "und");
    }

    #[test]
    fn cjk_script_detected_as_zh() {
        let text = "这是一个关于科技新闻的长文本用于测试语言检测功能";
        assert_eq!(detect(text), "zh");
    }
}
