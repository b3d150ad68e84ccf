pub mod image;
pub mod llm;
pub mod tts;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use image::TaskImageClient;
pub use llm::ChatClient;
pub use tts::SpeechClient;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{service} HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} API error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("image task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("image task {task_id} still pending after {waited_secs}s")]
    TaskTimeout { task_id: String, waited_secs: u64 },

    #[error("{0} response carried no usable payload")]
    MissingPayload(&'static str),
}

/// Chat-completion model: system prompt + user text in, reply text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Text-to-speech: writes the narration audio to `out`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    /// Reference picture for image-to-image generation.
    pub source_image_url: Option<String>,
}

/// Image generation: writes the picture for `request` to `out`.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest, out: &Path) -> Result<()>;
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .gzip(true)
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(800).collect()
}

pub(crate) async fn write_bytes(out: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    tokio::fs::write(out, bytes)
        .await
        .with_context(|| format!("write {}", out.display()))?;
    Ok(())
}
