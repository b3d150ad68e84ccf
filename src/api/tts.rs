use super::{ServiceError, SpeechSynthesizer, http_client, snippet, write_bytes};
use crate::config::TtsSettings;
use crate::logi;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;

fn request_body(settings: &TtsSettings, text: &str) -> serde_json::Value {
    let mut body = serde_json::json!({
        "input": text,
        "voice": settings.voice,
        "response_format": settings.format,
    });
    if !settings.model.is_empty() {
        body["model"] = serde_json::Value::String(settings.model.clone());
    }
    body
}

/// Speech endpoint that answers with the raw audio bytes.
pub struct SpeechClient {
    client: Client,
    settings: TtsSettings,
    retry: RetryPolicy,
}

impl SpeechClient {
    pub fn new(settings: TtsSettings, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout_secs)?,
            settings,
            retry,
        })
    }

    async fn synthesize_once(&self, text: &str, out: &Path) -> Result<()> {
        let resp = self
            .client
            .post(&self.settings.endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.settings.api_key)
            .json(&request_body(&self.settings, text))
            .send()
            .await
            .context("TTS request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                service: "TTS",
                status: status.as_u16(),
                body: snippet(&raw),
            }
            .into());
        }

        let bytes = resp.bytes().await.context("TTS response read failed")?;
        if bytes.is_empty() {
            return Err(ServiceError::MissingPayload("TTS").into());
        }
        write_bytes(out, &bytes).await
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()> {
        self.retry
            .run("TTS request", || self.synthesize_once(text, out))
            .await?;
        logi(format!("Narration audio saved: {}", out.display()));
        Ok(())
    }
}
