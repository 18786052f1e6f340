/// Read-only retrieval over a [`VideoKnowledgeBase`]: global browse, clip search, frame inspection
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::{format_scripts, VideoKnowledgeBase};
use crate::config::AgentConfig;
use crate::error::DiscoveryError;
use crate::llm::{ChatMessage, ChatRequest, Embedder, LLM};

/// Returned by `frame_inspect` when no frame backs the requested ranges
pub const NOT_FOUND: &str = "Error: Cannot find corresponding result in the given time range.";

const SEARCH_HEADER: &str = "Here is the searched video clip scripts:\n\n";

const BROWSE_SYSTEM_PROMPT: &str =
    "You are a knowledgeable assistant specializing in analyzing video content and providing detailed, insightful answers.";

const BROWSE_PROMPT: &str = "Below are descriptions of video clips, each with its corresponding timestamp. \
Carefully review the sequence of events, the details and movements of objects, and the actions and poses of people. \
Based on these observations, provide a thorough and specific answer to the following question, referencing key events and timestamps as appropriate.\n\
Question: {question}\n\n{clip_captions}";

const DEFAULT_BROWSE_QUESTION: &str = "Summarize the main events and the main subjects of this video.";

const INSPECT_SYSTEM_PROMPT: &str = "You are a helpful assistant to answer questions.";

const INSPECT_PROMPT: &str = "Carefully watch the video frames. Pay attention to the cause and sequence of events, \
the detail and movement of objects and the action and pose of persons.\n\n\
Based on your observations, answer the question if the frames contain relevant content. \
If no relevant content is found within the given time range, return: `{not_found}`.\n\
Question: {question}\n";

const DEFAULT_INSPECT_QUESTION: &str = "Describe in detail what happens in these frames.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Captions handed to the tool model by `global_browse`
    pub global_browse_topk: usize,
    pub frame_inspect_max_frames: usize,
    pub tool_max_tokens: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            global_browse_topk: 300,
            frame_inspect_max_frames: 50,
            tool_max_tokens: 512,
        }
    }
}

impl From<&AgentConfig> for RetrievalSettings {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            global_browse_topk: agent.global_browse_topk,
            frame_inspect_max_frames: agent.frame_inspect_max_frames,
            tool_max_tokens: agent.tool_max_tokens,
        }
    }
}

/// Clamp ranges to the video and sort them by start
fn normalize_ranges(ranges: &[(u64, u64)], video_length_secs: u64) -> Result<Vec<(u64, u64)>, DiscoveryError> {
    if ranges.is_empty() {
        return Err(DiscoveryError::InvalidTimeRange("no time ranges given".to_string()));
    }

    let mut normalized = Vec::with_capacity(ranges.len());
    for &(start, end) in ranges {
        if start > video_length_secs {
            return Err(DiscoveryError::InvalidTimeRange(format!(
                "start time {}s exceeds video length {}s",
                start, video_length_secs
            )));
        }
        if end < start {
            return Err(DiscoveryError::InvalidTimeRange(format!("end {}s is before start {}s", end, start)));
        }
        normalized.push((start, end.min(video_length_secs)));
    }

    normalized.sort_by_key(|r| r.0);
    Ok(normalized)
}

/// Frame indices spread uniformly over the concatenation of `ranges`.
///
/// `max_frames` offsets are laid out on the flattened timeline (last offset
/// strictly before its end), mapped back to absolute seconds, converted to
/// frame numbers at `fps` and clamped to the last frame of the video. The
/// result is sorted, deduplicated and never longer than `max_frames`.
pub fn sample_frame_indices(ranges: &[(u64, u64)], video_length_secs: u64, fps: f64, max_frames: usize) -> Vec<u64> {
    if ranges.is_empty() || max_frames == 0 {
        return Vec::new();
    }

    let total = ranges
        .iter()
        .fold(0u64, |acc, (s, e)| acc.saturating_add(e.saturating_sub(*s)));
    let timepoints: Vec<f64> = if total == 0 {
        ranges.iter().map(|(s, _)| *s as f64).collect()
    } else {
        (0..max_frames)
            .filter_map(|i| {
                let offset = total as f64 * i as f64 / max_frames as f64;
                let mut base = 0.0;
                for &(start, end) in ranges {
                    let len = end.saturating_sub(start) as f64;
                    if offset < base + len {
                        return Some(start as f64 + (offset - base));
                    }
                    base += len;
                }
                None
            })
            .collect()
    };

    let last_frame = ((video_length_secs as f64 * fps) as i64 - 1).max(0);
    let frames: BTreeSet<u64> = timepoints
        .into_iter()
        .map(|ts| ((ts * fps).round() as i64).clamp(0, last_frame) as u64)
        .collect();

    frames.into_iter().take(max_frames).collect()
}

/// Runs retrieval queries against a knowledge base using the tool model and embedder
#[derive(Clone)]
pub struct Retriever {
    tool_llm: Arc<dyn LLM>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(tool_llm: Arc<dyn LLM>, embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Self {
        Self {
            tool_llm,
            embedder,
            settings,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector for the query"))
    }

    async fn ask_tool_model(&self, request: ChatRequest) -> Result<String> {
        let request = request.with_temperature(0.0).with_max_tokens(self.settings.tool_max_tokens);
        let response = self.tool_llm.chat(request).await?;
        response
            .text_content()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No response from the model"))
    }

    /// Video-wide overview: the merged subject registry plus the tool model's
    /// answer over the `global_browse_topk` most relevant captions (or an even
    /// spread of captions when no query is given).
    pub async fn global_browse(&self, db: &VideoKnowledgeBase, query: Option<&str>, topk: usize) -> Result<String> {
        let topk = topk.min(self.settings.global_browse_topk.max(1));
        let query = query.map(str::trim).filter(|q| !q.is_empty());

        let entries = match query {
            Some(q) => {
                let embedding = self.embed_query(q).await?;
                db.search(&embedding, topk)
            }
            None => db.evenly_spaced(topk),
        };
        info!("🌐 global_browse over {} captions", entries.len());

        let clip_captions = format!("{}{}", SEARCH_HEADER, format_scripts(&entries));
        let prompt = BROWSE_PROMPT
            .replace("{question}", query.unwrap_or(DEFAULT_BROWSE_QUESTION))
            .replace("{clip_captions}", &clip_captions);

        let answer = self
            .ask_tool_model(ChatRequest::new(vec![
                ChatMessage::system(BROWSE_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ]))
            .await?;

        Ok(json!({
            "subject_registry": db.subject_registry,
            "query_related_event": answer,
        })
        .to_string())
    }

    /// The `topk` captions closest to `query`, re-ordered chronologically
    pub async fn clip_search(&self, db: &VideoKnowledgeBase, query: &str, topk: usize) -> Result<String> {
        let embedding = self.embed_query(query).await?;
        let entries = db.search(&embedding, topk);
        info!("🔎 clip_search matched {} captions", entries.len());

        Ok(format!("{}{}", SEARCH_HEADER, format_scripts(&entries)))
    }

    /// Ask the tool model about frames sampled from `time_ranges` (seconds)
    pub async fn frame_inspect(
        &self,
        db: &VideoKnowledgeBase,
        question: Option<&str>,
        time_ranges: &[(u64, u64)],
    ) -> Result<String> {
        let ranges = normalize_ranges(time_ranges, db.video_length_secs)?;
        let indices = sample_frame_indices(
            &ranges,
            db.video_length_secs,
            db.frames.fps,
            self.settings.frame_inspect_max_frames,
        );

        let files: Vec<_> = indices
            .iter()
            .map(|&i| db.frames.frame_path(i))
            .filter(|p| p.exists())
            .collect();
        debug!("frame_inspect sampled {} frames, {} on disk", indices.len(), files.len());

        if files.is_empty() {
            return Ok(NOT_FOUND.to_string());
        }

        let question = question.map(str::trim).filter(|q| !q.is_empty()).unwrap_or(DEFAULT_INSPECT_QUESTION);
        let prompt = INSPECT_PROMPT
            .replace("{not_found}", NOT_FOUND)
            .replace("{question}", question);

        info!("🖼️ frame_inspect on {} frames", files.len());
        self.ask_tool_model(
            ChatRequest::new(vec![ChatMessage::system(INSPECT_SYSTEM_PROMPT), ChatMessage::user(prompt)])
                .with_images(files),
        )
        .await
    }
}
