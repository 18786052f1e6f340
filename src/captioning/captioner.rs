use std::sync::Arc;
use tracing::{debug, warn};

use super::{CheckpointStore, ClipCaption, RawClipCaption};
use crate::clips::{seconds_to_hhmmss, ClipWindow};
use crate::llm::{ChatMessage, ChatRequest, LLM};

pub(crate) const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const CAPTION_PROMPT: &str = r#"The images are consecutive frames from one clip of a video. Watch the clip together with its transcript, then answer with JSON following the template below.

Transcript of this clip:
{transcript}

Template:
{
  "clip_start_time": "{clip_start}",
  "clip_end_time": "{clip_end}",
  "subject_registry": {
    "<subject_id>": {
      "name": <short identity if the real name is unknown>,
      "appearance": <list of appearance details>,
      "identity": <list of identity details>,
      "first_seen": <HH:MM:SS timestamp>
    },
    ...
  },
  "clip_description": <fluent, detailed narration of the clip>
}
"#;

/// Suffix appended to every clip description so transcript text stays searchable
pub fn transcript_suffix(transcript: &str) -> String {
    format!("\n\nTranscript during this video clip: {}.", transcript)
}

/// Where a clip caption came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionSource {
    Checkpoint,
    Generated,
    /// All attempts failed; the caption is empty
    Failed,
}

#[derive(Debug, Clone)]
pub struct CaptionOutcome {
    pub key: String,
    pub caption: ClipCaption,
    pub source: CaptionSource,
}

/// Captions one clip window with a vision model, with checkpointing and bounded retries
pub struct ClipCaptioner {
    llm: Arc<dyn LLM>,
    checkpoints: CheckpointStore,
    max_attempts: u32,
}

impl ClipCaptioner {
    pub fn new(llm: Arc<dyn LLM>, checkpoints: CheckpointStore, max_attempts: u32) -> Self {
        Self {
            llm,
            checkpoints,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn build_prompt(window: &ClipWindow) -> String {
        CAPTION_PROMPT
            .replace("{transcript}", &window.transcript_text)
            .replace("{clip_start}", &seconds_to_hhmmss(window.start_sec as f64))
            .replace("{clip_end}", &seconds_to_hhmmss(window.end_sec as f64))
    }

    /// Caption a window. Never fails: exhausting every attempt yields an empty caption.
    pub async fn caption(&self, window: &ClipWindow) -> CaptionOutcome {
        let key = window.key();

        if let Some(raw) = self.checkpoints.load(&key).await {
            return CaptionOutcome {
                caption: ClipCaption::from_raw(window.start_sec, window.end_sec, raw),
                key,
                source: CaptionSource::Checkpoint,
            };
        }

        let request = ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::build_prompt(window)),
        ])
        .with_images(window.frame_paths())
        .with_json_mode();

        for attempt in 1..=self.max_attempts {
            let response = match self.llm.chat(request.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Caption request for clip {} failed (attempt {}/{}): {}", key, attempt, self.max_attempts, e);
                    continue;
                }
            };

            let Some(content) = response.text_content() else {
                debug!("Empty caption response for clip {} (attempt {})", key, attempt);
                continue;
            };

            let mut raw: RawClipCaption = match serde_json::from_str(content) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Unparsable caption for clip {} (attempt {}/{}): {}", key, attempt, self.max_attempts, e);
                    continue;
                }
            };

            raw.clip_description.push_str(&transcript_suffix(&window.transcript_text));

            if let Err(e) = self.checkpoints.save(&key, &raw).await {
                warn!("Failed to write checkpoint for clip {}: {}", key, e);
            }

            return CaptionOutcome {
                caption: ClipCaption::from_raw(window.start_sec, window.end_sec, raw),
                key,
                source: CaptionSource::Generated,
            };
        }

        warn!("❌ Giving up on clip {} after {} attempts", key, self.max_attempts);
        CaptionOutcome {
            caption: ClipCaption::empty(window.start_sec, window.end_sec),
            key,
            source: CaptionSource::Failed,
        }
    }
}
