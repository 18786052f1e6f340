use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::captioner::SYSTEM_PROMPT;
use super::{parse_registry, MergedRegistry, SubjectRecord, SubjectRegistry};
use crate::llm::{ChatMessage, ChatRequest, LLM};

const MERGE_PROMPT: &str = r#"Below are several partial `subject_registry` JSON objects, each extracted from a different clip of the same video. The same subject may appear in several of them under a different id or with slightly different details.

Instructions:
1. Combine the partial registries into a single consistent `subject_registry`.
2. Keep every distinct subject.
3. When two entries clearly describe the same subject, fold them into one entry that keeps the earliest `first_seen` and the union of all other fields.

Partial registries (JSON list):
{registries}

Respond with the merged `subject_registry` JSON object and nothing else.
"#;

/// How partial registries are consolidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Ask the caption model to decide which entries are the same subject
    #[default]
    Model,
    /// Group entries by normalized name without any model call
    Local,
}

/// Consolidates per-clip subject registries into one video-wide registry
pub struct RegistryMerger {
    llm: Arc<dyn LLM>,
    max_attempts: u32,
    strategy: MergeStrategy,
}

impl RegistryMerger {
    pub fn new(llm: Arc<dyn LLM>, max_attempts: u32) -> Self {
        Self {
            llm,
            max_attempts: max_attempts.max(1),
            strategy: MergeStrategy::Model,
        }
    }

    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Merge partial registries. An empty input or exhausted attempts yield an empty registry.
    pub async fn merge(&self, partials: &[SubjectRegistry]) -> MergedRegistry {
        if partials.is_empty() {
            return MergedRegistry::new();
        }

        if self.strategy == MergeStrategy::Local {
            return merge_registries_locally(partials);
        }

        let registries = match serde_json::to_string(partials) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode partial registries: {}", e);
                return MergedRegistry::new();
            }
        };

        let request = ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(MERGE_PROMPT.replace("{registries}", &registries)),
        ])
        .with_json_mode();

        for attempt in 1..=self.max_attempts {
            let response = match self.llm.chat(request.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Registry merge request failed (attempt {}/{}): {}", attempt, self.max_attempts, e);
                    continue;
                }
            };

            let Some(content) = response.text_content() else {
                continue;
            };

            let merged = serde_json::from_str(content).ok().and_then(parse_registry);
            match merged {
                Some(merged) => {
                    let merged = reconcile(merged, partials);
                    info!("🧩 Merged {} partial registries into {} subjects", partials.len(), merged.len());
                    return merged;
                }
                None => warn!("Unparsable merged registry (attempt {}/{})", attempt, self.max_attempts),
            }
        }

        warn!("Registry merge gave up after {} attempts, continuing with an empty registry", self.max_attempts);
        MergedRegistry::new()
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn canonical_key(name: &str) -> String {
    normalize_name(name).replace(' ', "_")
}

/// Fold `other` into `into`: earliest `first_seen`, union of list fields
fn absorb(into: &mut SubjectRecord, other: &SubjectRecord) {
    if other.seen_before(into) {
        into.first_seen = other.first_seen.clone();
    }
    if into.name.trim().is_empty() {
        into.name = other.name.clone();
    }
    for (field, extra) in [
        (&mut into.appearance, &other.appearance),
        (&mut into.identity, &other.identity),
    ] {
        field.extend(extra.iter().cloned());
        field.sort();
        field.dedup();
    }
}

/// Enforce the merge invariants on a model-produced registry: every merged
/// entry absorbs the partial entries that share its normalized name.
fn reconcile(mut merged: MergedRegistry, partials: &[SubjectRegistry]) -> MergedRegistry {
    for record in merged.values_mut() {
        let name = normalize_name(&record.name);
        if name.is_empty() {
            continue;
        }
        for partial in partials.iter().flat_map(|p| p.values()) {
            if normalize_name(&partial.name) == name {
                absorb(record, partial);
            }
        }
    }
    merged
}

/// Deterministic merge grouping subjects by normalized name.
///
/// The result does not depend on the order of `partials`, and merging the
/// output again with any of its inputs is a no-op.
pub fn merge_registries_locally(partials: &[SubjectRegistry]) -> MergedRegistry {
    let mut groups: BTreeMap<String, SubjectRecord> = BTreeMap::new();

    for (local_id, record) in partials.iter().flat_map(|p| p.iter()) {
        let key = match canonical_key(&record.name) {
            k if k.is_empty() => canonical_key(local_id),
            k => k,
        };
        match groups.get_mut(&key) {
            Some(existing) => {
                let earlier = record.seen_before(existing);
                let tied = !earlier && !existing.seen_before(record);
                if earlier || (tied && record.name.trim() < existing.name.as_str()) {
                    existing.name = record.name.trim().to_string();
                }
                absorb(existing, record);
            }
            None => {
                let mut fresh = SubjectRecord {
                    name: record.name.trim().to_string(),
                    first_seen: record.first_seen.clone(),
                    ..SubjectRecord::default()
                };
                absorb(&mut fresh, record);
                groups.insert(key, fresh);
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, LLMResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLLM {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLM for FixedLLM {
        async fn chat(&self, _request: ChatRequest) -> anyhow::Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone().map(LLMResponse::text).unwrap_or_default())
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn provider_type(&self) -> LLMProvider {
            LLMProvider::LMStudio
        }
    }

    fn record(name: &str, appearance: &[&str], first_seen: &str) -> SubjectRecord {
        SubjectRecord {
            name: name.into(),
            appearance: appearance.iter().map(|s| s.to_string()).collect(),
            identity: Vec::new(),
            first_seen: first_seen.into(),
        }
    }

    fn partials() -> Vec<SubjectRegistry> {
        vec![
            BTreeMap::from([
                ("subject_1".to_string(), record("Chef", &["apron"], "00:01:05")),
                ("subject_2".to_string(), record("dog", &["brown"], "00:01:07")),
            ]),
            BTreeMap::from([("subject_1".to_string(), record("chef", &["hat"], "00:00:50"))]),
        ]
    }

    #[test]
    fn test_local_merge_keeps_earliest_and_unions() {
        let merged = merge_registries_locally(&partials());

        assert_eq!(merged.len(), 2);
        let chef = &merged["chef"];
        assert_eq!(chef.first_seen, "00:00:50");
        assert_eq!(chef.appearance, vec!["apron", "hat"]);
    }

    #[test]
    fn test_local_merge_is_order_independent_and_idempotent() {
        let forward = merge_registries_locally(&partials());
        let mut reversed = partials();
        reversed.reverse();

        assert_eq!(forward, merge_registries_locally(&reversed));
        assert_eq!(forward, merge_registries_locally(&[forward.clone()]));
    }

    #[test]
    fn test_oversized_first_seen_loses_to_valid_timestamp() {
        let partials = vec![
            BTreeMap::from([("subject_1".to_string(), record("Chef", &["apron"], "99999999999999999:00:00"))]),
            BTreeMap::from([("subject_1".to_string(), record("chef", &["hat"], "00:02:00"))]),
        ];

        let merged = merge_registries_locally(&partials);
        assert_eq!(merged["chef"].first_seen, "00:02:00");

        let from_model = BTreeMap::from([(
            "chef_1".to_string(),
            record("chef", &[], "5124095576030438:00:00"),
        )]);
        let reconciled = reconcile(from_model, &partials);
        assert_eq!(reconciled["chef_1"].first_seen, "00:02:00");
        assert_eq!(reconciled["chef_1"].appearance, vec!["apron", "hat"]);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let llm = Arc::new(FixedLLM {
            reply: Some("{}".into()),
            calls: AtomicUsize::new(0),
        });
        let merged = RegistryMerger::new(llm.clone(), 3).merge(&[]).await;

        assert!(merged.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_merge_is_reconciled() {
        let reply = r#"{"chef_1": {"name": "chef", "appearance": ["apron"], "identity": ["cook"], "first_seen": "00:01:05"}}"#;
        let llm = Arc::new(FixedLLM {
            reply: Some(reply.into()),
            calls: AtomicUsize::new(0),
        });
        let merged = RegistryMerger::new(llm.clone(), 3).merge(&partials()).await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(merged["chef_1"].first_seen, "00:00:50");
        assert_eq!(merged["chef_1"].appearance, vec!["apron", "hat"]);
    }

    #[tokio::test]
    async fn test_exhausted_merge_returns_empty() {
        let llm = Arc::new(FixedLLM {
            reply: Some("definitely not json".into()),
            calls: AtomicUsize::new(0),
        });
        let merged = RegistryMerger::new(llm.clone(), 3).merge(&partials()).await;

        assert!(merged.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }
}
