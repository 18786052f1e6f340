use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::captioning::{
    transcript_suffix, CaptionOutcome, CaptionSource, CheckpointStore, ClipCaption, ClipCaptioner, MergeStrategy,
    RegistryMerger, SubjectRegistry,
};
use crate::clips::{gather_clip_windows, parse_clip_key, ClipWindow};
use crate::config::Config;
use crate::knowledge::{CaptionFile, CaptionRecord, VideoKnowledgeBase};
use crate::llm::{Embedder, LLM};
use crate::transcription::SubtitleTrack;

/// Summary of one ingestion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Clip windows considered
    pub total: usize,
    /// Captions produced by the model in this run
    pub captioned: usize,
    /// Captions restored from checkpoints
    pub from_checkpoint: usize,
    /// Clips that exhausted their attempts
    pub empty: usize,
    /// Subjects in the merged registry
    pub subjects: usize,
    /// The caption file already existed and was reused as is
    pub reused: bool,
    pub lite: bool,
    pub total_time: Duration,
}

/// Captions every clip of a video with a bounded worker pool, merges the
/// subject registries and writes the aggregate caption file.
pub struct IngestionPipeline {
    config: Config,
    captioner: Arc<ClipCaptioner>,
    merger: RegistryMerger,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl IngestionPipeline {
    pub async fn new(config: Config, caption_llm: Arc<dyn LLM>) -> Result<Self> {
        let max_workers = config.ingestion.max_workers.max(1);
        info!("🔧 Initializing IngestionPipeline with {} workers", max_workers);

        let checkpoints = CheckpointStore::new(config.storage.checkpoint_dir()).await?;
        let captioner = ClipCaptioner::new(caption_llm.clone(), checkpoints, config.ingestion.max_attempts);
        let merger = RegistryMerger::new(caption_llm, config.ingestion.max_attempts);

        Ok(Self {
            config,
            captioner: Arc::new(captioner),
            merger,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_concurrent: max_workers,
        })
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merger = self.merger.with_strategy(strategy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Produce the caption file for the configured video.
    ///
    /// An existing caption file is returned untouched; otherwise clips are
    /// captioned (or, in lite mode, copied from the subtitles) and the result
    /// is written to `captions/captions.json`.
    pub async fn run(&self, subtitle_path: Option<&Path>) -> Result<(CaptionFile, IngestionReport)> {
        let start_time = Instant::now();
        let caption_path = self.config.storage.caption_file();

        if tokio::fs::try_exists(&caption_path).await? {
            info!("📄 Caption file {} already exists, skipping captioning", caption_path.display());
            let file = CaptionFile::load(&caption_path).await?;
            let report = IngestionReport {
                total: file.clips.len(),
                subjects: file.subject_registry.len(),
                reused: true,
                lite: self.config.ingestion.lite_mode,
                total_time: start_time.elapsed(),
                ..IngestionReport::default()
            };
            return Ok((file, report));
        }

        let subtitles = match subtitle_path {
            Some(path) => SubtitleTrack::from_file(path).await?,
            None => SubtitleTrack::new(),
        };

        let (file, mut report) = if self.config.ingestion.lite_mode {
            self.process_lite(&subtitles)
        } else {
            self.process_frames(&subtitles).await?
        };

        file.save(&caption_path).await?;
        report.total_time = start_time.elapsed();

        info!(
            "✅ Ingestion finished: {} clips ({} captioned, {} from checkpoints, {} empty) in {:.2}s",
            report.total,
            report.captioned,
            report.from_checkpoint,
            report.empty,
            report.total_time.as_secs_f64()
        );
        Ok((file, report))
    }

    /// Lite mode: every subtitle entry becomes a caption, no model calls
    pub fn process_lite(&self, subtitles: &SubtitleTrack) -> (CaptionFile, IngestionReport) {
        if subtitles.is_empty() {
            warn!("Lite mode without subtitles produces an empty caption file");
        }

        let mut clips: Vec<CaptionRecord> = subtitles
            .iter()
            .filter_map(|(key, text)| {
                let (start_secs, end_secs) = parse_clip_key(&key)?;
                Some(CaptionRecord {
                    start_secs,
                    end_secs,
                    caption: transcript_suffix(text),
                })
            })
            .collect();
        clips.sort_by_key(|c| c.start_secs);

        let report = IngestionReport {
            total: clips.len(),
            lite: true,
            ..IngestionReport::default()
        };
        let file = CaptionFile {
            clips,
            subject_registry: SubjectRegistry::new(),
        };
        (file, report)
    }

    async fn process_frames(&self, subtitles: &SubtitleTrack) -> Result<(CaptionFile, IngestionReport)> {
        let ingestion = &self.config.ingestion;
        let windows = gather_clip_windows(
            &self.config.storage.frames_dir(),
            ingestion.clip_secs,
            ingestion.video_fps,
            &ingestion.frame_prefix,
            subtitles,
        )?;

        if windows.is_empty() {
            warn!("No frames found in {}", self.config.storage.frames_dir().display());
        }

        let outcomes = self.caption_windows(windows).await;

        let mut report = IngestionReport {
            total: outcomes.len(),
            ..IngestionReport::default()
        };
        for outcome in &outcomes {
            match outcome.source {
                CaptionSource::Generated => report.captioned += 1,
                CaptionSource::Checkpoint => report.from_checkpoint += 1,
                CaptionSource::Failed => report.empty += 1,
            }
        }

        let captions: Vec<ClipCaption> = outcomes.into_iter().map(|o| o.caption).collect();
        let partials: Vec<SubjectRegistry> = captions
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.subject_registry.clone())
            .collect();

        let merged = self.merger.merge(&partials).await;
        report.subjects = merged.len();

        Ok((CaptionFile::from_captions(&captions, merged), report))
    }

    /// Caption windows in parallel with controlled concurrency, returned sorted by start time
    pub async fn caption_windows(&self, windows: Vec<ClipWindow>) -> Vec<CaptionOutcome> {
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);
        let total = windows.len();

        for (index, window) in windows.into_iter().enumerate() {
            let captioner = Arc::clone(&self.captioner);
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                info!("🎬 Captioning clip {}/{}: {}", index + 1, total, window.key());
                let outcome = captioner.caption(&window).await;

                if let Err(e) = tx.send(outcome).await {
                    error!("Failed to send caption result: {}", e);
                }
            });
        }

        // Drop the original sender to close the channel when all tasks complete
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        if outcomes.len() < total {
            warn!("{} caption workers exited without a result", total - outcomes.len());
        }

        outcomes.sort_by_key(|o| o.caption.clip_start);
        outcomes
    }

    /// Open the knowledge base for this video, building it from the caption file when missing
    pub async fn open_knowledge_base(&self, embedder: &dyn Embedder) -> Result<VideoKnowledgeBase> {
        VideoKnowledgeBase::open_for(&self.config, embedder).await
    }
}
