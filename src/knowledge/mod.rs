//! Searchable per-video knowledge base built from the caption file

pub mod caption_file;
pub mod retrieval;

pub use caption_file::{CaptionFile, CaptionRecord, REGISTRY_KEY};
pub use retrieval::{sample_frame_indices, RetrievalSettings, Retriever, NOT_FOUND};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::captioning::MergedRegistry;
use crate::clips::seconds_to_hhmmss;
use crate::config::Config;
use crate::llm::embedding::cosine_similarity;
use crate::llm::Embedder;

/// One indexed clip caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionEntry {
    pub start_secs: u64,
    pub end_secs: u64,
    /// Caption prefixed with `[From HH:MM:SS to HH:MM:SS seconds]`
    pub caption: String,
    pub embedding: Vec<f32>,
}

/// Where the extracted frames of the video live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub frames_dir: PathBuf,
    pub fps: f64,
    pub frame_prefix: String,
}

impl FrameLayout {
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.frames_dir.join(format!("{}_n{:06}.jpg", self.frame_prefix, index))
    }
}

/// Embedded clip captions plus video-level metadata.
///
/// Read-only once built; shared behind an `Arc` by every tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoKnowledgeBase {
    pub embedding_dim: usize,
    /// Sorted by start time
    pub entries: Vec<CaptionEntry>,
    pub subject_registry: MergedRegistry,
    pub video_length_secs: u64,
    pub frames: FrameLayout,
}

fn time_prefix(start: u64, end: u64) -> String {
    format!(
        "[From {} to {} seconds]\n",
        seconds_to_hhmmss(start as f64),
        seconds_to_hhmmss(end as f64)
    )
}

impl VideoKnowledgeBase {
    /// Embed every non-empty caption of `captions`
    pub async fn build(captions: &CaptionFile, embedder: &dyn Embedder, frames: FrameLayout) -> Result<Self> {
        let clips: Vec<_> = captions.clips.iter().filter(|c| !c.caption.is_empty()).collect();
        let texts: Vec<String> = clips.iter().map(|c| c.caption.clone()).collect();

        info!("🧮 Embedding {} captions...", texts.len());
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed(&texts).await?
        };
        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} captions",
                embeddings.len(),
                texts.len()
            ));
        }

        let mut entries: Vec<CaptionEntry> = clips
            .into_iter()
            .zip(embeddings)
            .map(|(clip, embedding)| CaptionEntry {
                start_secs: clip.start_secs,
                end_secs: clip.end_secs,
                caption: time_prefix(clip.start_secs, clip.end_secs) + &clip.caption,
                embedding,
            })
            .collect();
        entries.sort_by_key(|e| e.start_secs);

        Ok(Self {
            embedding_dim: embedder.dimension(),
            entries,
            subject_registry: captions.subject_registry.clone(),
            video_length_secs: captions.video_length_secs(),
            frames,
        })
    }

    /// Load `db_path` if present, otherwise build it from the caption file and persist it
    pub async fn open_or_build(
        caption_path: &Path,
        db_path: &Path,
        embedder: &dyn Embedder,
        frames: FrameLayout,
    ) -> Result<Self> {
        if tokio::fs::try_exists(db_path).await? {
            info!("📚 Database {} already exists, loading it", db_path.display());
            let db = Self::load(db_path).await?;
            if db.embedding_dim != embedder.dimension() {
                warn!(
                    "Database was built with {}-d embeddings but the embedder produces {}-d vectors",
                    db.embedding_dim,
                    embedder.dimension()
                );
            }
            return Ok(db);
        }

        let captions = CaptionFile::load(caption_path).await?;
        if !captions.is_covered() {
            warn!("Caption file {} does not cover the whole video", caption_path.display());
        }

        let db = Self::build(&captions, embedder, frames).await?;
        db.save(db_path).await?;
        Ok(db)
    }

    /// [`open_or_build`](Self::open_or_build) with the paths and frame layout of `config`
    pub async fn open_for(config: &Config, embedder: &dyn Embedder) -> Result<Self> {
        let storage = &config.storage;
        let frames = FrameLayout {
            frames_dir: storage.frames_dir(),
            fps: config.ingestion.video_fps,
            frame_prefix: config.ingestion.frame_prefix.clone(),
        };
        Self::open_or_build(&storage.caption_file(), &storage.database_file(), embedder, frames).await
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string(self)?).await?;
        info!("💾 Database saved: {} ({} clips)", path.display(), self.entries.len());
        Ok(())
    }

    /// Every entry tiles the video without gaps, starting at 0
    pub fn is_covered(&self) -> bool {
        let mut next = 0;
        for entry in &self.entries {
            if entry.start_secs != next {
                return false;
            }
            next = entry.end_secs + 1;
        }
        !self.entries.is_empty() && next == self.video_length_secs + 1
    }

    /// Up to `topk` entries ranked by cosine similarity to `query`.
    ///
    /// Ties go to the earlier clip; entries whose similarity is undefined rank last.
    pub fn search(&self, query: &[f32], topk: usize) -> Vec<&CaptionEntry> {
        let mut scored: Vec<(f64, &CaptionEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding).unwrap_or(f64::NEG_INFINITY), e))
            .collect();

        scored.sort_by(|(a, ea), (b, eb)| {
            b.partial_cmp(a)
                .unwrap_or(Ordering::Equal)
                .then(ea.start_secs.cmp(&eb.start_secs))
        });

        scored.into_iter().take(topk).map(|(_, e)| e).collect()
    }

    /// `topk` entries spread evenly across the video, for query-less browsing
    pub fn evenly_spaced(&self, topk: usize) -> Vec<&CaptionEntry> {
        let n = self.entries.len();
        if topk == 0 || n == 0 {
            return Vec::new();
        }
        if topk >= n {
            return self.entries.iter().collect();
        }

        let mut picked: Vec<usize> = (0..topk).map(|i| i * n / topk).collect();
        picked.dedup();
        picked.into_iter().map(|i| &self.entries[i]).collect()
    }
}

/// Join captions in chronological order, one per line
pub fn format_scripts(entries: &[&CaptionEntry]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.start_secs);
    sorted
        .iter()
        .map(|e| e.caption.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
