use crate::config::Config;
use crate::ffmpeg::Ffmpeg;
use crate::logi;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

fn required_dirs(cfg: &Config) -> Vec<PathBuf> {
    vec![
        cfg.paths.output_dir.clone(),
        cfg.paths.chapters_dir.clone(),
        cfg.llm.split_chapters_dir.clone(),
    ]
}

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    for dir in required_dirs(cfg) {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_ffmpeg(cfg: &Config) -> bool {
    Ffmpeg::new(cfg.video.clone()).is_available().await
}
