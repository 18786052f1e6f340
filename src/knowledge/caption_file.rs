/// Aggregate caption file (`captions.json`) written at the end of ingestion
use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::captioning::{parse_registry, ClipCaption, MergedRegistry};
use crate::clips::{clip_key, parse_clip_key};

/// Reserved top-level key holding the merged registry
pub const REGISTRY_KEY: &str = "subject_registry";
const LEGACY_REGISTRY_KEY: &str = "character_registry";

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionRecord {
    pub start_secs: u64,
    pub end_secs: u64,
    pub caption: String,
}

/// Clip captions in time order plus the merged subject registry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptionFile {
    pub clips: Vec<CaptionRecord>,
    pub subject_registry: MergedRegistry,
}

impl CaptionFile {
    /// Keep the non-empty captions, sorted by start time
    pub fn from_captions(captions: &[ClipCaption], subject_registry: MergedRegistry) -> Self {
        let mut clips: Vec<CaptionRecord> = captions
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| CaptionRecord {
                start_secs: c.clip_start,
                end_secs: c.clip_end,
                caption: c.clip_description.clone(),
            })
            .collect();
        clips.sort_by_key(|c| c.start_secs);

        Self { clips, subject_registry }
    }

    /// Video length: the largest clip end time
    pub fn video_length_secs(&self) -> u64 {
        self.clips.iter().map(|c| c.end_secs).max().unwrap_or(0)
    }

    /// Whether the clips tile `[0, video_length]` with no gap or overlap
    pub fn is_covered(&self) -> bool {
        let mut ranges: Vec<(u64, u64)> = self.clips.iter().map(|c| (c.start_secs, c.end_secs)).collect();
        ranges.sort();

        let mut next = 0;
        for (start, end) in ranges {
            if start != next || end < start {
                return false;
            }
            next = end + 1;
        }
        next > 0
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for clip in &self.clips {
            map.insert(clip_key(clip.start_secs, clip.end_secs), json!({ "caption": clip.caption }));
        }
        map.insert(
            REGISTRY_KEY.to_string(),
            serde_json::to_value(&self.subject_registry).unwrap_or_else(|_| json!({})),
        );
        Value::Object(map)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(anyhow!("caption file must be a JSON object"));
        };

        let mut file = CaptionFile::default();
        for (key, entry) in map {
            if key == REGISTRY_KEY || key == LEGACY_REGISTRY_KEY {
                if file.subject_registry.is_empty() {
                    file.subject_registry = parse_registry(entry).unwrap_or_default();
                }
                continue;
            }

            let Some((start_secs, end_secs)) = parse_clip_key(&key) else {
                warn!("Skipping unexpected caption key {:?}", key);
                continue;
            };

            let caption = match entry.get("caption") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => items
                    .first()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .unwrap_or_default(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };

            file.clips.push(CaptionRecord {
                start_secs,
                end_secs,
                caption,
            });
        }

        file.clips.sort_by_key(|c| c.start_secs);
        Ok(file)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let file = Self::from_value(serde_json::from_str(&content)?)?;
        info!("📄 Loaded {} clip captions from {}", file.clips.len(), path.display());
        Ok(file)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&self.to_value())?).await?;
        info!("💾 Caption file saved: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captioning::SubjectRecord;

    fn caption(start: u64, end: u64, text: &str) -> ClipCaption {
        ClipCaption {
            clip_start: start,
            clip_end: end,
            subject_registry: Default::default(),
            clip_description: text.into(),
        }
    }

    #[test]
    fn test_registry_key_is_written_last() {
        let mut registry = MergedRegistry::new();
        registry.insert("chef".into(), SubjectRecord::default());
        let file = CaptionFile::from_captions(&[caption(10, 19, "b"), caption(0, 9, "a")], registry);

        let text = serde_json::to_string(&file.to_value()).unwrap();
        assert!(text.starts_with(r#"{"0_9":{"caption":"a"},"10_19""#));
        assert!(text.contains(r#""subject_registry":{"chef""#));
    }

    #[test]
    fn test_empty_captions_are_dropped() {
        let file = CaptionFile::from_captions(&[caption(0, 9, "a"), ClipCaption::empty(10, 19)], Default::default());
        assert_eq!(file.clips.len(), 1);
        assert_eq!(file.video_length_secs(), 9);
    }

    #[test]
    fn test_parse_tolerates_legacy_shapes() {
        let value = serde_json::json!({
            "10_19": {"caption": ["second", "ignored"]},
            "0_9": {"caption": "first"},
            "character_registry": {"s1": {"name": "host"}},
        });
        let file = CaptionFile::from_value(value).unwrap();

        assert_eq!(file.clips[0].caption, "first");
        assert_eq!(file.clips[1].caption, "second");
        assert_eq!(file.subject_registry["s1"].name, "host");
        assert!(file.is_covered());
    }

    #[test]
    fn test_coverage_detects_gaps() {
        let file = CaptionFile::from_captions(&[caption(0, 9, "a"), caption(20, 29, "c")], Default::default());
        assert!(!file.is_covered());
    }
}
