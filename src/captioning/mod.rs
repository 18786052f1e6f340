//! Per-clip captioning and cross-clip subject registry consolidation

pub mod captioner;
pub mod checkpoint;
pub mod merger;

pub use captioner::{transcript_suffix, CaptionOutcome, CaptionSource, ClipCaptioner};
pub use checkpoint::CheckpointStore;
pub use merger::{merge_registries_locally, MergeStrategy, RegistryMerger};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::clips::hhmmss_to_seconds;

/// Descriptive attributes of one on-screen subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubjectRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub appearance: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub identity: Vec<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub first_seen: String,
}

impl SubjectRecord {
    /// `first_seen` in seconds, when it parses as a timestamp
    pub fn first_seen_secs(&self) -> Option<u64> {
        hhmmss_to_seconds(&self.first_seen)
            .ok()
            .or_else(|| self.first_seen.trim().parse::<f64>().ok().map(|s| s as u64))
    }

    /// Whether `self` was seen strictly earlier than `other`
    pub fn seen_before(&self, other: &SubjectRecord) -> bool {
        match (self.first_seen_secs(), other.first_seen_secs()) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => self.first_seen < other.first_seen,
        }
    }
}

/// Subjects keyed by their local id (per clip) or canonical identity (merged)
pub type SubjectRegistry = BTreeMap<String, SubjectRecord>;

/// Video-wide registry produced by the merge step
pub type MergedRegistry = SubjectRegistry;

/// Structured model output for one clip, also the checkpoint file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClipCaption {
    #[serde(deserialize_with = "string_or_number")]
    pub clip_start_time: String,
    #[serde(deserialize_with = "string_or_number")]
    pub clip_end_time: String,
    #[serde(deserialize_with = "lenient_registry")]
    pub subject_registry: SubjectRegistry,
    pub clip_description: String,
}

/// Caption for one clip window; empty when captioning gave up
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClipCaption {
    pub clip_start: u64,
    pub clip_end: u64,
    pub subject_registry: SubjectRegistry,
    pub clip_description: String,
}

impl ClipCaption {
    pub fn empty(clip_start: u64, clip_end: u64) -> Self {
        Self {
            clip_start,
            clip_end,
            ..Self::default()
        }
    }

    pub fn from_raw(clip_start: u64, clip_end: u64, raw: RawClipCaption) -> Self {
        Self {
            clip_start,
            clip_end,
            subject_registry: raw.subject_registry,
            clip_description: raw.clip_description,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clip_description.is_empty() && self.subject_registry.is_empty()
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(Value::deserialize(deserializer)?))
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(value_to_string).filter(|s| !s.is_empty()).collect(),
        Value::Null => Vec::new(),
        other => {
            let s = value_to_string(other);
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        }
    })
}

/// Registries whose entries are not objects are dropped entry by entry
fn lenient_registry<'de, D>(deserializer: D) -> Result<SubjectRegistry, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(map) = Value::deserialize(deserializer)? else {
        return Ok(SubjectRegistry::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(id, value)| {
            serde_json::from_value::<SubjectRecord>(value)
                .ok()
                .map(|record| (id, record))
        })
        .collect())
}

/// Parse a registry object returned by a model, tolerating odd field shapes
pub fn parse_registry(value: Value) -> Option<SubjectRegistry> {
    match value {
        Value::Object(_) => lenient_registry(value).ok(),
        _ => None,
    }
}
