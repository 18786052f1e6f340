use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Subtitle text keyed by whole-second `(start, end)` ranges.
///
/// Identical ranges are concatenated in the order they were encountered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleTrack {
    entries: BTreeMap<(u64, u64), String>,
}

impl SubtitleTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `.srt` file; a missing file yields an empty track
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            warn!("Subtitle file not found: {}", path.display());
            return Ok(Self::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Ok(parse_srt(&content))
    }

    /// Add text for a range, appending to any text already under that range
    pub fn insert(&mut self, start_sec: u64, end_sec: u64, text: &str) {
        self.entries
            .entry((start_sec, end_sec))
            .and_modify(|existing| {
                existing.push(' ');
                existing.push_str(text);
            })
            .or_insert_with(|| text.to_string());
    }

    /// Text stored under the `"<start>_<end>"` key
    pub fn get(&self, key: &str) -> Option<&str> {
        let (start, end) = key.split_once('_')?;
        let range = (start.parse().ok()?, end.parse().ok()?);
        self.entries.get(&range).map(String::as_str)
    }

    /// Entries in time order as `("<start>_<end>", text)`
    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> {
        self.entries
            .iter()
            .map(|((s, e), text)| (format!("{}_{}", s, e), text.as_str()))
    }

    /// Text of every entry whose range overlaps `[start, end]`, in time order
    pub fn overlapping(&self, start: u64, end: u64) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|((s, e), _)| *s <= end && *e >= start)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse SRT content into a [`SubtitleTrack`].
///
/// Index lines are optional. Blocks whose time line cannot be parsed are
/// skipped together with their text; multi-line text is joined with spaces.
pub fn parse_srt(content: &str) -> SubtitleTrack {
    let lines: Vec<&str> = content.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut track = SubtitleTrack::new();
    let mut skipped = 0usize;
    let n = lines.len();
    let mut idx = 0;

    while idx < n {
        let line = lines[idx].trim();
        if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
            idx += 1;
            continue;
        }
        if !line.contains("-->") {
            idx += 1;
            continue;
        }

        let range = parse_time_line(line);
        idx += 1;

        let mut text_lines = Vec::new();
        while idx < n && !lines[idx].trim().is_empty() {
            text_lines.push(lines[idx].trim());
            idx += 1;
        }

        match range {
            Some((start, end)) => {
                let start_sec = start.as_secs();
                let end_sec = end.as_secs();
                track.insert(start_sec, end_sec, &text_lines.join(" "));
            }
            None => {
                skipped += 1;
                debug!("Skipping malformed subtitle time line: {:?}", line);
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed subtitle blocks", skipped);
    }
    track
}

fn parse_time_line(line: &str) -> Option<(Duration, Duration)> {
    let (start, end) = line.split_once("-->")?;
    // cue settings may follow the end timestamp
    let end = end.split_whitespace().next()?;
    Some((parse_single_timestamp(start.trim()).ok()?, parse_single_timestamp(end).ok()?))
}

/// Parse a single timestamp (HH:MM:SS,mmm); a `.` millisecond separator is also accepted
fn parse_single_timestamp(timestamp: &str) -> Result<Duration> {
    let time_parts: Vec<&str> = timestamp.split([',', '.']).collect();
    if time_parts.len() != 2 {
        return Err(anyhow::anyhow!("Invalid timestamp format"));
    }

    let hms_parts: Vec<&str> = time_parts[0].split(':').collect();
    if hms_parts.len() != 3 {
        return Err(anyhow::anyhow!("Invalid time format"));
    }

    let hours: u64 = hms_parts[0].parse()?;
    let minutes: u64 = hms_parts[1].parse()?;
    let seconds: u64 = hms_parts[2].parse()?;
    let milliseconds: u64 = time_parts[1].parse()?;

    let total_millis = hours
        .checked_mul(3600)
        .and_then(|secs| secs.checked_add(minutes.checked_mul(60)?))
        .and_then(|secs| secs.checked_add(seconds))
        .and_then(|secs| secs.checked_mul(1000))
        .and_then(|millis| millis.checked_add(milliseconds))
        .ok_or_else(|| anyhow::anyhow!("Timestamp out of range: {}", timestamp))?;

    Ok(Duration::from_millis(total_millis))
}
