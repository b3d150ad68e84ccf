use super::{ImageGenerator, ImageRequest, ServiceError, http_client, snippet, write_bytes};
use crate::config::ImageSettings;
use crate::retry::RetryPolicy;
use crate::{logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};

const HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq)]
enum ImagePayload {
    Url(String),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq)]
enum TaskState {
    Pending(String),
    Succeeded(ImagePayload),
    Failed(String),
}

fn submit_body(settings: &ImageSettings, request: &ImageRequest) -> Value {
    let mut input = json!({ "prompt": request.prompt });
    if let Some(url) = request.source_image_url.as_deref().filter(|u| !u.is_empty()) {
        input["ref_img"] = Value::String(url.to_string());
    }
    json!({
        "model": settings.model,
        "input": input,
        "parameters": {
            "size": settings.size,
            "n": 1,
        },
    })
}

fn parse_task_id(root: &Value) -> Result<String, ServiceError> {
    if let Some(message) = root.get("message").and_then(|v| v.as_str()) {
        if root.get("code").is_some() {
            return Err(ServiceError::Api {
                service: "image",
                message: message.to_string(),
            });
        }
    }
    root.pointer("/output/task_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(ServiceError::MissingPayload("image submit"))
}

fn parse_task_state(root: &Value) -> Result<TaskState, ServiceError> {
    let status = root
        .pointer("/output/task_status")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN");

    match status {
        "SUCCEEDED" => {
            let first = root.pointer("/output/results/0");
            let url = first.and_then(|r| r.get("url")).and_then(|v| v.as_str());
            let b64 = first
                .and_then(|r| r.get("b64_image").or_else(|| r.get("b64_json")))
                .and_then(|v| v.as_str());
            match (url, b64) {
                (Some(url), _) if !url.is_empty() => Ok(TaskState::Succeeded(ImagePayload::Url(url.to_string()))),
                (_, Some(data)) if !data.is_empty() => {
                    Ok(TaskState::Succeeded(ImagePayload::Base64(data.to_string())))
                }
                _ => Err(ServiceError::MissingPayload("image task")),
            }
        }
        "FAILED" | "CANCELED" | "UNKNOWN" => {
            let message = root
                .pointer("/output/message")
                .and_then(|v| v.as_str())
                .unwrap_or(status)
                .to_string();
            Ok(TaskState::Failed(message))
        }
        other => Ok(TaskState::Pending(other.to_string())),
    }
}

/// Asynchronous image service: submit a task, poll until it settles, then
/// fetch the picture.
pub struct TaskImageClient {
    client: Client,
    settings: ImageSettings,
    retry: RetryPolicy,
}

impl TaskImageClient {
    pub fn new(settings: ImageSettings, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: http_client(HTTP_TIMEOUT_SECS)?,
            settings,
            retry,
        })
    }

    async fn get_json(&self, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ServiceError::Http {
                service: "image",
                status: status.as_u16(),
                body: snippet(&raw),
            }
            .into());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("image response is not JSON: {}", snippet(&raw)))
    }

    async fn submit(&self, request: &ImageRequest) -> Result<String> {
        let resp = self
            .client
            .post(&self.settings.submit_endpoint)
            .bearer_auth(&self.settings.api_key)
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&submit_body(&self.settings, request))
            .send()
            .await
            .context("image submit failed")?;
        let root = self.get_json(resp).await?;
        Ok(parse_task_id(&root)?)
    }

    async fn wait_for_task(&self, task_id: &str) -> Result<ImagePayload> {
        let interval = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        let max_wait = Duration::from_secs(self.settings.max_wait_secs);
        let url = format!("{}/{}", self.settings.task_endpoint.trim_end_matches('/'), task_id);
        let started = Instant::now();

        loop {
            if started.elapsed() >= max_wait {
                return Err(ServiceError::TaskTimeout {
                    task_id: task_id.to_string(),
                    waited_secs: self.settings.max_wait_secs,
                }
                .into());
            }
            tokio::time::sleep(interval).await;

            let resp = match self
                .client
                .get(&url)
                .bearer_auth(&self.settings.api_key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    logw(format!("Image task {} query failed: {}", task_id, err));
                    continue;
                }
            };
            let root = match self.get_json(resp).await {
                Ok(root) => root,
                Err(err) => {
                    logw(format!("Image task {} query failed: {:#}", task_id, err));
                    continue;
                }
            };

            match parse_task_state(&root)? {
                TaskState::Succeeded(payload) => return Ok(payload),
                TaskState::Failed(message) => {
                    return Err(ServiceError::TaskFailed {
                        task_id: task_id.to_string(),
                        message,
                    }
                    .into());
                }
                TaskState::Pending(status) => {
                    logi(format!(
                        "Image task {} {} ({:.0}s elapsed)",
                        task_id,
                        status,
                        started.elapsed().as_secs_f64()
                    ));
                }
            }
        }
    }

    async fn fetch(&self, payload: &ImagePayload) -> Result<Vec<u8>> {
        match payload {
            ImagePayload::Url(url) => {
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .context("image download failed")?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ServiceError::Http {
                        service: "image download",
                        status: status.as_u16(),
                        body: String::new(),
                    }
                    .into());
                }
                Ok(resp.bytes().await.context("image download failed")?.to_vec())
            }
            ImagePayload::Base64(data) => base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .context("image payload is not valid base64"),
        }
    }
}

#[async_trait]
impl ImageGenerator for TaskImageClient {
    async fn generate(&self, request: &ImageRequest, out: &Path) -> Result<()> {
        let task_id = self
            .retry
            .run("image submit", || self.submit(request))
            .await?;
        logi(format!("Image task submitted: {}", task_id));

        let payload = self.wait_for_task(&task_id).await?;
        let bytes = self
            .retry
            .run("image download", || self.fetch(&payload))
            .await?;
        if bytes.is_empty() {
            return Err(ServiceError::MissingPayload("image download").into());
        }
        write_bytes(out, &bytes).await?;
        logi(format!("Scene image saved: {}", out.display()));
        Ok(())
    }
}
