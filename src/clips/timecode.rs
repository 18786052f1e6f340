use crate::error::{DiscoveryError, Result};

/// Format whole seconds as `HH:MM:SS`
pub fn seconds_to_hhmmss(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse `HH:MM:SS` or `MM:SS`, ignoring any fractional part
pub fn hhmmss_to_seconds(value: &str) -> Result<u64> {
    let value = value.trim();
    let whole = value.split('.').next().unwrap_or(value);
    let parts: Vec<&str> = whole.split(':').collect();

    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => ("0", *m, *s),
        _ => {
            return Err(DiscoveryError::InvalidTimestamp(format!(
                "{:?} (expected HH:MM:SS)",
                value
            )))
        }
    };

    let parse = |part: &str| {
        part.trim()
            .parse::<u64>()
            .map_err(|_| DiscoveryError::InvalidTimestamp(format!("{:?}", value)))
    };
    let (hours, minutes, seconds) = (parse(h)?, parse(m)?, parse(s)?);
    hours
        .checked_mul(3600)
        .and_then(|secs| secs.checked_add(minutes.checked_mul(60)?))
        .and_then(|secs| secs.checked_add(seconds))
        .ok_or_else(|| DiscoveryError::InvalidTimestamp(format!("{:?} is out of range", value)))
}

/// Key used for caption maps and checkpoint files
pub fn clip_key(start: u64, end: u64) -> String {
    format!("{}_{}", start, end)
}

/// Inverse of [`clip_key`]
pub fn parse_clip_key(key: &str) -> Option<(u64, u64)> {
    let (start, end) = key.split_once('_')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
