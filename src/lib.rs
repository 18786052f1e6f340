/// Video Discovery - long-video question answering
///
/// Ingestion cuts a video's extracted frames and subtitles into fixed-length
/// clips, captions every clip in parallel with a vision model, and merges the
/// per-clip subject registries. Question answering runs an iteration-bounded
/// tool-calling loop over an embedded knowledge base of those captions.

pub mod agent;
pub mod captioning;
pub mod clips;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod processing;
pub mod transcription;

// Re-export main types for easy access
pub use crate::agent::{AgentEvent, AgentOutcome, Orchestrator, Termination, ToolRegistry};
pub use crate::captioning::{ClipCaption, ClipCaptioner, MergedRegistry, RegistryMerger, SubjectRecord};
pub use crate::clips::{gather_clip_windows, ClipWindow};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{DiscoveryError, Result};
pub use crate::knowledge::{CaptionFile, Retriever, RetrievalSettings, VideoKnowledgeBase};
pub use crate::llm::{create_embedder, create_llm, Embedder, LLMConfig, LLMProvider, LLM};
pub use crate::processing::{IngestionPipeline, IngestionReport};
pub use crate::transcription::{parse_srt, SubtitleTrack};
