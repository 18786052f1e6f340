use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::RawClipCaption;

/// Per-clip checkpoint files, one `<start>_<end>.json` per captioned window.
///
/// Each worker only ever touches the file for its own clip key, so no
/// cross-task locking is needed.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a checkpoint store, creating the directory if needed
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load a checkpoint; unreadable or corrupt files count as missing
    pub async fn load(&self, key: &str) -> Option<RawClipCaption> {
        let path = self.path_for(key);
        let content = fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str(&content) {
            Ok(raw) => {
                debug!("📋 Using checkpoint for clip {}", key);
                Some(raw)
            }
            Err(e) => {
                warn!("Ignoring corrupt checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist a clip's structured output; written to a temp file first, then renamed
    pub async fn save(&self, key: &str, raw: &RawClipCaption) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));

        fs::write(&tmp, serde_json::to_string_pretty(raw)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!("💾 Checkpoint saved: {}", path.display());
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }
}
