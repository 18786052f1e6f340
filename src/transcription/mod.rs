pub mod srt;

pub use srt::{parse_srt, SubtitleTrack};
