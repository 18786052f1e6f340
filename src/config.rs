use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::llm::embedding::EmbeddingProvider;
use crate::llm::{EmbeddingConfig, LLMConfig, LLMProvider};

/// Configuration for video ingestion and question answering.
///
/// Built once and passed by reference into the windower, captioner,
/// knowledge base and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Clip segmentation and captioning settings
    pub ingestion: IngestionConfig,

    /// Orchestrator loop and retrieval tool settings
    pub agent: AgentConfig,

    /// Model endpoints for each role
    pub models: ModelsConfig,

    /// On-disk layout of a single video's artifacts
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Clip window length in seconds
    pub clip_secs: u64,

    /// Frames per second the frame folder was extracted at
    pub video_fps: f64,

    /// Maximum number of concurrent captioning workers
    pub max_workers: usize,

    /// Attempts per clip (and for the registry merge) before giving up
    pub max_attempts: u32,

    /// Only use subtitles, no pixel captioning and no `frame_inspect`
    pub lite_mode: bool,

    /// File name prefix of extracted frames
    pub frame_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model calls allowed per question
    pub max_iterations: usize,

    /// Captions considered by `global_browse`
    pub global_browse_topk: usize,

    /// `clip_search` result count when the model omits `topk`
    pub clip_search_topk: usize,

    /// Replaces the `topk` of every tool call when greater than 0
    pub topk_override: usize,

    /// Frames sampled by `frame_inspect`
    pub frame_inspect_max_frames: usize,

    /// Sampling temperature for the orchestrator model
    pub temperature: f32,

    /// Max tokens for the tool model's answers
    pub tool_max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Vision model producing per-clip captions and merging registries
    pub caption: LLMConfig,

    /// Reasoning model driving the tool loop
    pub orchestrator: LLMConfig,

    /// Model answering inside `global_browse` and `frame_inspect`
    pub tool: LLMConfig,

    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Folder holding one video's `frames/`, `captions/` and `database.json`
    pub video_root: PathBuf,
}

impl StorageConfig {
    pub fn frames_dir(&self) -> PathBuf {
        self.video_root.join("frames")
    }

    pub fn captions_dir(&self) -> PathBuf {
        self.video_root.join("captions")
    }

    pub fn caption_file(&self) -> PathBuf {
        self.captions_dir().join("captions.json")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.captions_dir().join("ckpt")
    }

    pub fn database_file(&self) -> PathBuf {
        self.video_root.join("database.json")
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = [
            "video-discovery.toml",
            "config/video-discovery.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Parse a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            for llm in [
                &mut config.models.caption,
                &mut config.models.orchestrator,
                &mut config.models.tool,
            ] {
                llm.provider = LLMProvider::OpenAI;
                llm.endpoint = None;
                llm.api_key = Some(api_key.clone());
            }
            config.models.caption.model = "gpt-4.1-mini".to_string();
            config.models.orchestrator.model = "o3".to_string();
            config.models.tool.model = "gpt-4.1-mini".to_string();
            config.models.embedding.provider = EmbeddingProvider::OpenAI;
            config.models.embedding.api_key = Some(api_key);
        }

        if let Ok(workers) = std::env::var("VIDEO_DISCOVERY_WORKERS") {
            config.ingestion.max_workers = workers
                .parse()
                .map_err(|_| anyhow!("invalid VIDEO_DISCOVERY_WORKERS={:?}", workers))?;
        }

        if let Ok(clip_secs) = std::env::var("VIDEO_DISCOVERY_CLIP_SECS") {
            config.ingestion.clip_secs = clip_secs
                .parse()
                .map_err(|_| anyhow!("invalid VIDEO_DISCOVERY_CLIP_SECS={:?}", clip_secs))?;
        }

        if let Ok(lite) = std::env::var("VIDEO_DISCOVERY_LITE_MODE") {
            config.ingestion.lite_mode = matches!(lite.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(iterations) = std::env::var("VIDEO_DISCOVERY_MAX_ITERATIONS") {
            config.agent.max_iterations = iterations
                .parse()
                .map_err(|_| anyhow!("invalid VIDEO_DISCOVERY_MAX_ITERATIONS={:?}", iterations))?;
        }

        if let Ok(topk) = std::env::var("VIDEO_DISCOVERY_TOPK_OVERRIDE") {
            config.agent.topk_override = topk
                .parse()
                .map_err(|_| anyhow!("invalid VIDEO_DISCOVERY_TOPK_OVERRIDE={:?}", topk))?;
        }

        if let Ok(root) = std::env::var("VIDEO_DISCOVERY_VIDEO_ROOT") {
            config.storage.video_root = PathBuf::from(root);
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ingestion.clip_secs == 0 {
            return Err(anyhow!("clip_secs must be greater than 0"));
        }

        if self.ingestion.video_fps <= 0.0 {
            return Err(anyhow!("video_fps must be greater than 0"));
        }

        if self.ingestion.max_workers == 0 {
            return Err(anyhow!("max_workers must be greater than 0"));
        }

        if self.ingestion.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than 0"));
        }

        if self.agent.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be greater than 0"));
        }

        if self.agent.frame_inspect_max_frames == 0 {
            return Err(anyhow!("frame_inspect_max_frames must be greater than 0"));
        }

        for (role, llm) in [
            ("caption", &self.models.caption),
            ("orchestrator", &self.models.orchestrator),
            ("tool", &self.models.tool),
        ] {
            if llm.provider == LLMProvider::OpenAI && llm.api_key.is_none() {
                return Err(anyhow!("API key required for the {} model", role));
            }
            if llm.provider == LLMProvider::LMStudio && llm.endpoint.is_none() {
                return Err(anyhow!("Endpoint required for the {} model", role));
            }
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Discovery Configuration:\n\
            - Video Root: {}\n\
            - Clip Length: {}s @ {} fps\n\
            - Workers: {}\n\
            - Lite Mode: {}\n\
            - Max Iterations: {}\n\
            - Caption Model: {}\n\
            - Orchestrator Model: {}",
            self.storage.video_root.display(),
            self.ingestion.clip_secs,
            self.ingestion.video_fps,
            self.ingestion.max_workers,
            self.ingestion.lite_mode,
            self.agent.max_iterations,
            self.models.caption.model,
            self.models.orchestrator.model,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingestion: IngestionConfig {
                clip_secs: 10,
                video_fps: 2.0,
                max_workers: num_cpus::get().min(16),
                max_attempts: 3,
                lite_mode: false,
                frame_prefix: "frame".to_string(),
            },
            agent: AgentConfig {
                max_iterations: 15,
                global_browse_topk: 300,
                clip_search_topk: 16,
                topk_override: 0,
                frame_inspect_max_frames: 50,
                temperature: 0.0,
                tool_max_tokens: 512,
            },
            models: ModelsConfig {
                caption: LLMConfig::default(),
                orchestrator: LLMConfig::default(),
                tool: LLMConfig::default(),
                embedding: EmbeddingConfig::default(),
            },
            storage: StorageConfig {
                video_root: PathBuf::from("./video_database/default"),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_video_root(mut self, root: PathBuf) -> Self {
        self.config.storage.video_root = root;
        self
    }

    pub fn with_clip_secs(mut self, secs: u64) -> Self {
        self.config.ingestion.clip_secs = secs;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.ingestion.max_workers = workers;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.ingestion.max_attempts = attempts;
        self
    }

    pub fn lite_mode(mut self, enable: bool) -> Self {
        self.config.ingestion.lite_mode = enable;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.config.agent.max_iterations = iterations;
        self
    }

    pub fn with_topk_override(mut self, topk: usize) -> Self {
        self.config.agent.topk_override = topk;
        self
    }

    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.config.models.embedding.dimension = dimension;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
