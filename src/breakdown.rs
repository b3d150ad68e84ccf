use crate::api::ChatModel;
use crate::config::Config;
use crate::{loge, logi, logok, logw};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

fn chapter_text_regex() -> Result<&'static Regex> {
    static CHAPTER_TEXT: OnceCell<Regex> = OnceCell::new();
    CHAPTER_TEXT.get_or_try_init(|| {
        Regex::new(r"^chapter_.+_detailed\.txt$").context("failed to compile chapter file regex")
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BreakdownSummary {
    pub parsed: usize,
    pub raw: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Removes a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(reply: &str) -> &str {
    let text = reply.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// `chapter_001_detailed.txt` -> `chapter_001_processed.json`.
pub fn output_name(text_file: &Path) -> Option<String> {
    let stem = text_file.file_stem()?.to_str()?;
    Some(format!("{}_processed.json", stem.replace("_detailed", "")))
}

async fn list_chapter_texts(dir: &Path) -> Result<Vec<PathBuf>> {
    let re = chapter_text_regex()?;
    let mut out = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| re.is_match(n))
            .unwrap_or(false);
        if matches && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Pretty JSON when the reply parses, the reply untouched otherwise.
pub fn render_reply(reply: &str) -> (String, bool) {
    match serde_json::from_str::<serde_json::Value>(strip_code_fence(reply)) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => (pretty, true),
            Err(_) => (reply.to_string(), false),
        },
        Err(_) => (reply.to_string(), false),
    }
}

/// Sends every split chapter without a breakdown yet to the model and
/// stores the reply beside the other processed chapters.
pub async fn run_breakdown(cfg: &Config, model: &dyn ChatModel) -> Result<BreakdownSummary> {
    let system_prompt = fs::read_to_string(&cfg.llm.system_prompt)
        .await
        .with_context(|| format!("Failed to read system prompt: {}", cfg.llm.system_prompt.display()))?;
    let out_dir = &cfg.paths.chapters_dir;
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create dir {}", out_dir.display()))?;

    let texts = list_chapter_texts(&cfg.llm.split_chapters_dir).await?;
    logi(format!("Found {} chapter text file(s)", texts.len()));

    let interval = Duration::from_secs_f64(cfg.llm.request_interval_secs.max(0.0));
    let mut summary = BreakdownSummary::default();

    for text_file in texts {
        let Some(name) = output_name(&text_file) else {
            continue;
        };
        let out_path = out_dir.join(name);
        if out_path.exists() {
            logi(format!("{} exists, skipping", out_path.display()));
            summary.skipped += 1;
            continue;
        }

        let chapter_text = match fs::read_to_string(&text_file).await {
            Ok(text) => text,
            Err(err) => {
                loge(format!("Failed to read {}: {}", text_file.display(), err));
                summary.failed += 1;
                continue;
            }
        };

        logi(format!("Breaking down {}", text_file.display()));
        let reply = match model.complete(&system_prompt, &chapter_text).await {
            Ok(reply) => reply,
            Err(err) => {
                loge(format!("Breakdown failed for {}: {:#}", text_file.display(), err));
                summary.failed += 1;
                continue;
            }
        };

        let (content, parsed) = render_reply(&reply);
        if let Err(err) = fs::write(&out_path, content).await {
            loge(format!("Failed to write {}: {}", out_path.display(), err));
            summary.failed += 1;
            continue;
        }
        if parsed {
            summary.parsed += 1;
            logok(format!("Breakdown saved: {}", out_path.display()));
        } else {
            summary.raw += 1;
            logw(format!("Reply was not JSON; saved raw text: {}", out_path.display()));
        }

        tokio::time::sleep(interval).await;
    }

    Ok(summary)
}
