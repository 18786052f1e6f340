mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{write_frames, CaptionModel};
use video_discovery::captioning::{CheckpointStore, MergeStrategy};
use video_discovery::llm::HashingEmbedder;
use video_discovery::{gather_clip_windows, CaptionFile, ConfigBuilder, IngestionPipeline, SubtitleTrack};

#[tokio::test]
async fn test_rerun_reuses_captions_and_database() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .with_video_root(temp_dir.path().to_path_buf())
        .with_workers(2)
        .build();
    // 30 frames at 2 fps: windows 0..9 and 10..14
    write_frames(&config.storage.frames_dir(), 30);
    let embedder = HashingEmbedder::new(64);

    let model = Arc::new(CaptionModel::new());
    let pipeline = IngestionPipeline::new(config.clone(), model.clone()).await.unwrap();
    let (file, report) = pipeline.run(None).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.captioned, 2);
    assert_eq!(report.subjects, 1);
    // two captions plus one merge
    assert_eq!(model.calls(), 3);
    assert_eq!(file.clips.len(), 2);
    assert!(file.clips[0].caption.ends_with("Transcript during this video clip: No transcript.."));

    let db = pipeline.open_knowledge_base(&embedder).await.unwrap();
    assert_eq!(db.entries.len(), 2);
    assert_eq!(db.video_length_secs, 14);
    let database_bytes = std::fs::read(config.storage.database_file()).unwrap();

    let second_model = Arc::new(CaptionModel::new());
    let second = IngestionPipeline::new(config.clone(), second_model.clone()).await.unwrap();
    let (_, report) = second.run(None).await.unwrap();
    second.open_knowledge_base(&embedder).await.unwrap();

    assert!(report.reused);
    assert_eq!(second_model.calls(), 0);
    assert_eq!(std::fs::read(config.storage.database_file()).unwrap(), database_bytes);
}

#[tokio::test]
async fn test_checkpoints_skip_captioned_clips() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .with_video_root(temp_dir.path().to_path_buf())
        .build();
    write_frames(&config.storage.frames_dir(), 30);

    let model = Arc::new(CaptionModel::new());
    let pipeline = IngestionPipeline::new(config.clone(), model.clone())
        .await
        .unwrap()
        .with_merge_strategy(MergeStrategy::Local);
    let (first, _) = pipeline.run(None).await.unwrap();
    assert_eq!(model.calls(), 2);

    // Losing the aggregate file falls back to the per-clip checkpoints
    std::fs::remove_file(config.storage.caption_file()).unwrap();

    let resumed_model = Arc::new(CaptionModel::new());
    let resumed = IngestionPipeline::new(config.clone(), resumed_model.clone())
        .await
        .unwrap()
        .with_merge_strategy(MergeStrategy::Local);
    let (second, report) = resumed.run(None).await.unwrap();

    assert_eq!(resumed_model.calls(), 0);
    assert_eq!(report.from_checkpoint, 2);
    assert_eq!(report.captioned, 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_failed_clip_does_not_abort_ingestion() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .with_video_root(temp_dir.path().to_path_buf())
        .with_max_attempts(2)
        .build();
    // 50 frames at 2 fps: windows 0..9, 10..19 and 20..24
    write_frames(&config.storage.frames_dir(), 50);

    let model = Arc::new(CaptionModel::failing_at("00:00:10"));
    let pipeline = IngestionPipeline::new(config.clone(), model.clone())
        .await
        .unwrap()
        .with_merge_strategy(MergeStrategy::Local);
    let (file, report) = pipeline.run(None).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.captioned, 2);
    assert_eq!(report.empty, 1);
    // one attempt for each good clip, every attempt for the failing one
    assert_eq!(model.calls(), 4);

    let starts: Vec<u64> = file.clips.iter().map(|c| c.start_secs).collect();
    assert_eq!(starts, vec![0, 20]);
    assert!(!file.is_covered());

    let checkpoints = CheckpointStore::new(config.storage.checkpoint_dir()).await.unwrap();
    assert!(checkpoints.exists("0_9").await);
    assert!(!checkpoints.exists("10_19").await);

    let saved = CaptionFile::load(&config.storage.caption_file()).await.unwrap();
    assert_eq!(saved, file);
}

#[tokio::test]
async fn test_subtitles_reach_the_caption_prompt() {
    let temp_dir = TempDir::new().unwrap();
    let srt = temp_dir.path().join("video.srt");
    std::fs::write(&srt, "1\n00:00:01,000 --> 00:00:03,000\nKick-off!\n").unwrap();

    let config = ConfigBuilder::new()
        .with_video_root(temp_dir.path().join("video"))
        .build();
    write_frames(&config.storage.frames_dir(), 30);

    let pipeline = IngestionPipeline::new(config, Arc::new(CaptionModel::new()))
        .await
        .unwrap()
        .with_merge_strategy(MergeStrategy::Local);
    let (file, _) = pipeline.run(Some(&srt)).await.unwrap();

    assert!(file.clips[0].caption.ends_with("Transcript during this video clip: Kick-off!."));
    assert!(file.clips[1].caption.ends_with("Transcript during this video clip: No transcript.."));
}

#[tokio::test]
async fn test_caption_outcomes_are_sorted_when_workers_finish_out_of_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .with_video_root(temp_dir.path().to_path_buf())
        .with_workers(4)
        .build();
    // 80 frames at 2 fps: windows starting at 0, 10, 20 and 30
    write_frames(&config.storage.frames_dir(), 80);

    let model = Arc::new(CaptionModel::delayed(&[("00:00:00", 400), ("00:00:10", 200)]));
    let pipeline = IngestionPipeline::new(config.clone(), model.clone()).await.unwrap();
    let ingestion = &config.ingestion;
    let windows = gather_clip_windows(
        &config.storage.frames_dir(),
        ingestion.clip_secs,
        ingestion.video_fps,
        &ingestion.frame_prefix,
        &SubtitleTrack::new(),
    )
    .unwrap();

    let outcomes = pipeline.caption_windows(windows).await;

    let answered = model.answered();
    assert_eq!(answered.len(), 4);
    assert_eq!(answered.last().map(String::as_str), Some("00:00:00"));

    let starts: Vec<u64> = outcomes.iter().map(|o| o.caption.clip_start).collect();
    assert_eq!(starts, vec![0, 10, 20, 30]);
    let keys: Vec<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["0_9", "10_19", "20_29", "30_39"]);
}
