use crate::logw;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const PROGRESS_FILE: &str = ".progress.json";

/// Completed sub-steps of one paragraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParagraphProgress {
    pub audio_done: bool,
    pub video_done: bool,
    pub scene_files: Vec<String>,
}

/// The checkpoint file of one chapter directory.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    entries: BTreeMap<String, ParagraphProgress>,
}

impl ProgressStore {
    /// Loads `{chapter_dir}/.progress.json`. A missing or unreadable file
    /// starts an empty record.
    pub async fn load(chapter_dir: &Path) -> Self {
        let path = chapter_dir.join(PROGRESS_FILE);
        let entries = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(err) => {
                    logw(format!("Ignoring corrupt progress file {}: {}", path.display(), err));
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> ParagraphProgress {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    pub fn entry_mut(&mut self, key: &str) -> &mut ParagraphProgress {
        self.entries.entry(key.to_string()).or_default()
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("write progress: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProgressStore::load(dir.path()).await;
        assert_eq!(store.get("第1章-开端"), ParagraphProgress::default());

        {
            let entry = store.entry_mut("第1章-开端");
            entry.audio_done = true;
            entry.scene_files.push("scene_1.jpg".to_string());
        }
        store.save().await.unwrap();

        let text = std::fs::read_to_string(dir.path().join(PROGRESS_FILE)).unwrap();
        assert!(text.contains("\"第1章-开端\""));
        assert!(text.contains("\"audio_done\": true"));

        let reloaded = ProgressStore::load(dir.path()).await;
        let entry = reloaded.get("第1章-开端");
        assert!(entry.audio_done);
        assert!(!entry.video_done);
        assert_eq!(entry.scene_files, ["scene_1.jpg"]);
    }

    #[tokio::test]
    async fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROGRESS_FILE), "{not json").unwrap();
        let store = ProgressStore::load(dir.path()).await;
        assert_eq!(store.get("anything"), ParagraphProgress::default());
    }

    #[tokio::test]
    async fn partial_records_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROGRESS_FILE),
            r#"{"第2章-雨": {"video_done": true}}"#,
        )
        .unwrap();
        let store = ProgressStore::load(dir.path()).await;
        let entry = store.get("第2章-雨");
        assert!(entry.video_done);
        assert!(!entry.audio_done);
        assert!(entry.scene_files.is_empty());
    }
}
