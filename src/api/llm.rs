use super::{ChatModel, ServiceError, http_client, snippet};
use crate::config::LlmSettings;
use crate::retry::RetryPolicy;
use crate::{logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const MAX_CHAPTER_BYTES: usize = 320_000;

fn trim_copy_utf8_safe(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }

    let mut cut = max_bytes.min(input.len());
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}

/// Pulls the reply text out of a chat response. Understands the
/// OpenAI-style `choices[0].message.content` and the Anthropic-style
/// `content[0].text` shapes.
fn extract_reply_text(root: &serde_json::Value) -> Result<String, ServiceError> {
    if let Some(err) = root.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        if let Some(code) = err.get("code").and_then(|v| v.as_str()) {
            logw(format!("LLM error code: {}", code));
        }
        return Err(ServiceError::Api {
            service: "LLM",
            message,
        });
    }

    let openai = root
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str());
    let anthropic = root.pointer("/content/0/text").and_then(|v| v.as_str());

    match openai.or(anthropic) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(ServiceError::MissingPayload("LLM")),
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatClient {
    client: Client,
    settings: LlmSettings,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(settings: LlmSettings, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout_secs)?,
            settings,
            retry,
        })
    }

    async fn request_once(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ServiceError::Http {
                service: "LLM",
                status: status.as_u16(),
                body: snippet(&raw),
            }
            .into());
        }

        let root: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("LLM response is not JSON: {}", snippet(&raw)))?;
        Ok(extract_reply_text(&root)?)
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let user = trim_copy_utf8_safe(user, MAX_CHAPTER_BYTES);
        let reply = self
            .retry
            .run("LLM request", || self.request_once(system, &user))
            .await?;
        logi(format!("LLM reply received ({} chars)", reply.chars().count()));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_shape() {
        let root = json!({"choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}]});
        assert_eq!(extract_reply_text(&root).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn extracts_anthropic_shape() {
        let root = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(extract_reply_text(&root).unwrap(), "hello");
    }

    #[test]
    fn error_object_becomes_api_error() {
        let root = json!({"error": {"message": "quota exceeded", "code": "429"}});
        let err = extract_reply_text(&root).unwrap_err();
        assert!(matches!(err, ServiceError::Api { .. }));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn empty_reply_is_missing_payload() {
        let root = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(matches!(
            extract_reply_text(&root),
            Err(ServiceError::MissingPayload("LLM"))
        ));
    }

    #[test]
    fn trims_on_char_boundary() {
        let text = "章节内容";
        let cut = trim_copy_utf8_safe(text, 4);
        assert_eq!(cut, "章");
        assert_eq!(trim_copy_utf8_safe(text, 100), text);
    }
}
