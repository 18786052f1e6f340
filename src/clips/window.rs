use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::timecode::clip_key;
use crate::transcription::SubtitleTrack;

/// Transcript text used for windows without any overlapping subtitle
pub const NO_TRANSCRIPT: &str = "No transcript.";

/// One extracted frame on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRef {
    pub path: PathBuf,
    /// Sequential frame number encoded in the file name
    pub index: u64,
    pub timestamp_secs: f64,
}

/// A fixed-length time segment of the video, the unit of captioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start_sec: u64,
    pub end_sec: u64,
    pub frame_refs: Vec<FrameRef>,
    pub transcript_text: String,
}

impl ClipWindow {
    pub fn key(&self) -> String {
        clip_key(self.start_sec, self.end_sec)
    }

    pub fn frame_paths(&self) -> Vec<PathBuf> {
        self.frame_refs.iter().map(|f| f.path.clone()).collect()
    }
}

fn frame_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?P<prefix>.*)_n(?P<index>\d+)\.jpe?g$").expect("valid frame regex"))
}

/// Scan a frame folder for `<prefix>..._n<index>.jpg` files, sorted by index
pub fn discover_frames(frames_dir: &Path, fps: f64, prefix: &str) -> Result<Vec<FrameRef>> {
    let mut frames = Vec::new();

    for entry in WalkDir::new(frames_dir).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(prefix) {
            continue;
        }
        let Some(captures) = frame_name_pattern().captures(&name) else {
            continue;
        };
        let Ok(index) = captures["index"].parse::<u64>() else {
            continue;
        };
        frames.push(FrameRef {
            path: entry.path().to_path_buf(),
            index,
            timestamp_secs: index as f64 / fps,
        });
    }

    frames.sort_by_key(|f| f.index);
    debug!("Discovered {} frames in {}", frames.len(), frames_dir.display());
    Ok(frames)
}

/// Partition `[0, duration]` into windows of `clip_secs` seconds.
///
/// `start_i = i * clip_secs`, `end_i = min(start_i + clip_secs - 1, duration)`.
/// Each window owns the frames timestamped in `[start_i, start_i + clip_secs)`
/// and the joined text of every overlapping subtitle entry.
pub fn build_windows(
    duration: u64,
    clip_secs: u64,
    frames: &[FrameRef],
    subtitles: &SubtitleTrack,
) -> Vec<ClipWindow> {
    let clip_secs = clip_secs.max(1);
    let mut windows = Vec::new();
    let mut start = 0u64;

    while start <= duration {
        let end = (start + clip_secs - 1).min(duration);

        let frame_refs = frames
            .iter()
            .filter(|f| f.timestamp_secs >= start as f64 && f.timestamp_secs < (start + clip_secs) as f64)
            .cloned()
            .collect();

        let transcript = subtitles.overlapping(start, end).join(" ");
        let transcript = transcript.trim();

        windows.push(ClipWindow {
            start_sec: start,
            end_sec: end,
            frame_refs,
            transcript_text: if transcript.is_empty() {
                NO_TRANSCRIPT.to_string()
            } else {
                transcript.to_string()
            },
        });

        start += clip_secs;
    }

    windows
}

/// Discover frames and cut them into windows; the video length is the last frame timestamp
pub fn gather_clip_windows(
    frames_dir: &Path,
    clip_secs: u64,
    fps: f64,
    frame_prefix: &str,
    subtitles: &SubtitleTrack,
) -> Result<Vec<ClipWindow>> {
    let frames = discover_frames(frames_dir, fps, frame_prefix)?;
    let Some(last) = frames.last() else {
        return Ok(Vec::new());
    };

    let duration = last.timestamp_secs as u64;
    let windows = build_windows(duration, clip_secs, &frames, subtitles);
    info!("🎞️ {} frames cut into {} clips of {}s", frames.len(), windows.len(), clip_secs);
    Ok(windows)
}
