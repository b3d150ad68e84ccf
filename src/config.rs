use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_CONFIG_PATH: &str = "configs/settings.yaml";

const LLM_KEY_ENV: &str = "NOVEL_REEL_LLM_KEY";
const TTS_KEY_ENV: &str = "NOVEL_REEL_TTS_KEY";
const IMAGE_KEY_ENV: &str = "NOVEL_REEL_IMAGE_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSettings,
    pub tts: TtsSettings,
    pub image: ImageSettings,
    pub paths: PathSettings,
    pub video: VideoSettings,
    pub subtitle: SubtitleSettings,
    pub retry: RetrySettings,
    #[serde(skip)]
    source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub system_prompt: PathBuf,
    pub split_chapters_dir: PathBuf,
    /// Pause between chapter requests.
    pub request_interval_secs: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            max_tokens: 40_960,
            temperature: 0.2,
            timeout_secs: 120,
            system_prompt: PathBuf::from("chapters/prompt_change.md"),
            split_chapters_dir: PathBuf::from("chapters/split_chapters"),
            request_interval_secs: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub format: String,
    pub timeout_secs: u64,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/speech".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "wav".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub submit_endpoint: String,
    pub task_endpoint: String,
    pub api_key: String,
    pub model: String,
    pub size: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            submit_endpoint:
                "https://dashscope.aliyuncs.com/api/v1/services/aigc/text2image/image-synthesis"
                    .to_string(),
            task_endpoint: "https://dashscope.aliyuncs.com/api/v1/tasks".to_string(),
            api_key: String::new(),
            model: "wanx-v1".to_string(),
            size: "1280*720".to_string(),
            poll_interval_secs: 5,
            max_wait_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub chapters_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Explicit chapter files (relative to `chapters_dir`); empty means every
    /// `*_processed.json` found there.
    pub chapter_files: Vec<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            chapters_dir: PathBuf::from("chapters/processed"),
            output_dir: PathBuf::from("output"),
            chapter_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub upscale_width: u32,
    pub upscale_height: u32,
    pub crf: u32,
    pub preset: String,
    pub bgm_path: PathBuf,
    pub bgm_volume: f64,
    /// Max gap between a cached video and its expected duration, in seconds.
    pub cache_tolerance_secs: f64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            fps: 30,
            width: 1920,
            height: 1080,
            upscale_width: 2400,
            upscale_height: 1350,
            crf: 23,
            preset: "slow".to_string(),
            bgm_path: PathBuf::from("configs/bgm.mp3"),
            bgm_volume: 0.3,
            cache_tolerance_secs: 1.0,
        }
    }
}

/// Character-count thresholds used by the subtitle segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleSettings {
    pub short_unit_chars: usize,
    pub comma_split_min_chars: usize,
    pub max_unit_chars: usize,
    pub min_unit_chars: usize,
    pub short_cue_chars: usize,
    pub short_cue_floor_secs: f64,
    pub long_cue_chars: usize,
    pub long_cue_cap_secs: f64,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            short_unit_chars: 15,
            comma_split_min_chars: 25,
            max_unit_chars: 30,
            min_unit_chars: 2,
            short_cue_chars: 10,
            short_cue_floor_secs: 1.5,
            long_cue_chars: 40,
            long_cue_cap_secs: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 10.0,
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_secs.max(0.0))
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Re-reads the file this config was loaded from.
    pub async fn reload(&mut self) -> Result<()> {
        let Some(path) = self.source.clone() else {
            anyhow::bail!("config was not loaded from a file");
        };
        *self = Self::load(path).await?;
        Ok(())
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Credentials needed to render chapters (TTS + images).
    pub fn validate_credentials(&self) -> Result<()> {
        if self.tts.api_key.is_empty() {
            anyhow::bail!("settings: tts.api_key missing (or set {TTS_KEY_ENV})");
        }
        if self.image.api_key.is_empty() {
            anyhow::bail!("settings: image.api_key missing (or set {IMAGE_KEY_ENV})");
        }
        Ok(())
    }

    pub fn validate_llm_credentials(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            anyhow::bail!("settings: llm.api_key missing (or set {LLM_KEY_ENV})");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        for (var, slot) in [
            (LLM_KEY_ENV, &mut self.llm.api_key),
            (TTS_KEY_ENV, &mut self.tts.api_key),
            (IMAGE_KEY_ENV, &mut self.image.api_key),
        ] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *slot = value.trim().to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg.video.fps, 30);
        assert_eq!(cfg.video.width, 1920);
        assert_eq!(cfg.subtitle.max_unit_chars, 30);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.paths.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = "video:\n  fps: 25\n  bgm_volume: 0.2\nsubtitle:\n  max_unit_chars: 20\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.video.fps, 25);
        assert_eq!(cfg.video.bgm_volume, 0.2);
        assert_eq!(cfg.video.height, 1080);
        assert_eq!(cfg.subtitle.max_unit_chars, 20);
        assert_eq!(cfg.subtitle.short_unit_chars, 15);
    }

    #[test]
    fn shipped_settings_parse() {
        let cfg = Config::from_yaml(include_str!("../configs/settings.yaml")).unwrap();
        assert_eq!(cfg.image.size, "1280*720");
        assert_eq!(cfg.video.bgm_path, PathBuf::from("configs/bgm.mp3"));
        assert_eq!(cfg.retry.backoff(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn reload_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "video:\n  crf: 20\n").await.unwrap();

        let mut cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.video.crf, 20);
        assert_eq!(cfg.source(), Some(path.as_path()));

        fs::write(&path, "video:\n  crf: 28\n").await.unwrap();
        cfg.reload().await.unwrap();
        assert_eq!(cfg.video.crf, 28);
    }

    #[tokio::test]
    async fn reload_without_source_fails() {
        let mut cfg = Config::default();
        assert!(cfg.reload().await.is_err());
    }
}
