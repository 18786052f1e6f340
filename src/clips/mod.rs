/// Clip windowing: cutting a video's frames and transcript into fixed-length windows

pub mod timecode;
pub mod window;

pub use timecode::{clip_key, hhmmss_to_seconds, parse_clip_key, seconds_to_hhmmss};
pub use window::{build_windows, discover_frames, gather_clip_windows, ClipWindow, FrameRef, NO_TRANSCRIPT};
