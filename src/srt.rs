use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// One timed subtitle entry, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn to_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// `HH:MM:SS,mmm`, rounded to the nearest millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = to_millis(seconds);
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let ts = ts.trim();
    let (hms, ms) = ts.split_once([',', '.'])?;
    let mut parts = hms.split(':');
    let hh: u64 = parts.next()?.trim().parse().ok()?;
    let mm: u64 = parts.next()?.trim().parse().ok()?;
    let ss: u64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = ms.trim().parse().ok()?;
    Some((hh * 3600 + mm * 60 + ss) as f64 + ms as f64 / 1000.0)
}

/// Parses SRT text. Index lines are ignored; blocks without a valid timing
/// line are skipped.
pub fn parse(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut lines = content.lines().map(|l| l.trim_end_matches('\r')).peekable();

    while let Some(line) = lines.next() {
        let Some((a, b)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_timestamp(a), parse_timestamp(b)) else {
            continue;
        };

        let mut text_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            text_lines.push(next.to_string());
            lines.next();
        }
        cues.push(SubtitleCue::new(start, end, text_lines.join("\n")));
    }

    cues
}

/// Renders cues as SRT, numbering from 1. Cues that collapse to zero length
/// at millisecond precision are dropped.
pub fn render(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    let kept = cues
        .iter()
        .filter(|cue| to_millis(cue.end) > to_millis(cue.start));
    for (i, cue) in kept.enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }
    out
}

pub async fn read_file(path: &Path) -> Result<Vec<SubtitleCue>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("read srt: {}", path.display()))?;
    Ok(parse(content.trim_start_matches('\u{feff}')))
}

pub async fn write_file(path: &Path, cues: &[SubtitleCue]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(path, render(cues))
        .await
        .with_context(|| format!("write srt: {}", path.display()))?;
    Ok(())
}
