#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use video_discovery::captioning::SubjectRegistry;
use video_discovery::knowledge::{CaptionRecord, FrameLayout};
use video_discovery::llm::{ChatRequest, HashingEmbedder, LLMResponse, ToolCallRequest};
use video_discovery::{CaptionFile, LLMProvider, VideoKnowledgeBase, LLM};

/// Vision model stand-in: answers caption requests (those carrying frames)
/// with a fixed JSON caption and merge requests with a one-subject registry.
pub struct CaptionModel {
    calls: AtomicUsize,
    failing_clip: Option<String>,
    delays: Vec<(String, Duration)>,
    answered: Mutex<Vec<String>>,
}

impl CaptionModel {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing_clip: None,
            delays: Vec::new(),
            answered: Mutex::new(Vec::new()),
        }
    }

    /// Every request for the clip starting at `start` (HH:MM:SS) errors out
    pub fn failing_at(start: &str) -> Self {
        Self {
            failing_clip: Some(start.to_string()),
            ..Self::new()
        }
    }

    /// Caption requests for the listed clip starts (HH:MM:SS) answer after a delay
    pub fn delayed(delays: &[(&str, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(start, ms)| (start.to_string(), Duration::from_millis(*ms)))
                .collect(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clip starts in the order their captions were returned
    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLM for CaptionModel {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        if request.images.is_empty() {
            return Ok(LLMResponse::text(
                json!({
                    "subject_1": {
                        "name": "Alice",
                        "appearance": ["red jacket"],
                        "identity": ["host"],
                        "first_seen": "00:00:00"
                    }
                })
                .to_string(),
            ));
        }

        let is_clip = |start: &str| prompt.contains(&format!("\"clip_start_time\": \"{}\"", start));
        if self.failing_clip.as_deref().map_or(false, is_clip) {
            return Err(anyhow!("vision model timed out"));
        }
        let start = self.delays.iter().find(|(start, _)| is_clip(start));
        if let Some((_, delay)) = start {
            tokio::time::sleep(*delay).await;
        }
        let start_time = prompt
            .split("\"clip_start_time\": \"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default()
            .to_string();
        self.answered.lock().unwrap().push(start_time);

        Ok(LLMResponse::text(
            json!({
                "clip_start_time": "00:00:00",
                "clip_end_time": "00:00:09",
                "subject_registry": {
                    "subject_1": {
                        "name": "Alice",
                        "appearance": ["red jacket"],
                        "identity": ["host"],
                        "first_seen": "00:00:00"
                    }
                },
                "clip_description": format!("Alice talks to the camera across {} frames", request.images.len())
            })
            .to_string(),
        ))
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

/// Orchestrator model replaying queued responses, then `fallback` forever
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<LLMResponse>>>,
    fallback: Option<LLMResponse>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<LLMResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: LLMResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LLM for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("script exhausted")),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}

/// Tool model that answers every question the same way
pub struct ToolModel;

#[async_trait]
impl LLM for ToolModel {
    async fn chat(&self, _request: ChatRequest) -> Result<LLMResponse> {
        Ok(LLMResponse::text("Alice scores a goal at 00:01:00."))
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> LLMResponse {
    LLMResponse::with_tool_calls(vec![ToolCallRequest::new(id, name, arguments)])
}

/// Write `count` empty frame files named like extracted frames
pub fn write_frames(dir: &Path, count: u64) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        std::fs::write(dir.join(format!("frame_n{:06}.jpg", i)), b"jpeg").unwrap();
    }
}

/// A 300s video made of 30 ten-second captions
pub async fn sample_knowledge_base(frames_dir: &Path) -> VideoKnowledgeBase {
    let clips = (0..30u64)
        .map(|i| CaptionRecord {
            start_secs: i * 10,
            end_secs: i * 10 + 9,
            caption: format!("Clip {}: players pass the ball and Alice shoots at goal", i),
        })
        .collect();
    let file = CaptionFile {
        clips,
        subject_registry: SubjectRegistry::new(),
    };
    let frames = FrameLayout {
        frames_dir: frames_dir.to_path_buf(),
        fps: 2.0,
        frame_prefix: "frame".to_string(),
    };

    VideoKnowledgeBase::build(&file, &HashingEmbedder::new(64), frames)
        .await
        .unwrap()
}

pub fn hashing_embedder() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::new(64))
}
