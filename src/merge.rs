use crate::ffmpeg::Ffmpeg;
use crate::srt::{self, SubtitleCue};
use crate::{logi, logw};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Subtitle file paired with the rendered media it was timed against.
#[derive(Debug, Clone)]
pub struct SubtitlePair {
    pub subtitle: PathBuf,
    pub media: PathBuf,
}

impl SubtitlePair {
    pub fn new(subtitle: impl Into<PathBuf>, media: impl Into<PathBuf>) -> Self {
        Self {
            subtitle: subtitle.into(),
            media: media.into(),
        }
    }
}

/// Rescales each block of cues to the measured duration of its media and
/// shifts it by the measured durations of everything before it.
///
/// `blocks` must be in concatenation order. A non-positive measured duration
/// falls back to the block's own last cue end.
pub fn merge_cues(blocks: &[(Vec<SubtitleCue>, f64)]) -> Vec<SubtitleCue> {
    let mut merged = Vec::new();
    let mut offset = 0.0;

    for (cues, actual) in blocks {
        let own_end = cues.iter().map(|c| c.end).fold(0.0_f64, f64::max);
        let span = if *actual > 0.0 { *actual } else { own_end };
        let scale = if own_end > 0.0 && *actual > 0.0 {
            actual / own_end
        } else {
            1.0
        };

        for cue in cues {
            let start = offset + cue.start * scale;
            let end = offset + cue.end * scale;
            if end > start {
                merged.push(SubtitleCue::new(start, end, cue.text.clone()));
            }
        }
        offset += span;
    }

    merged
}

/// Reads each pair, measures the media and writes the merged subtitle file.
/// Pairs whose subtitle is missing or unreadable still advance the offset by
/// their media duration so later cues stay aligned.
pub async fn merge_subtitle_files(
    ffmpeg: &Ffmpeg,
    pairs: &[SubtitlePair],
    output: &Path,
) -> Result<usize> {
    let mut blocks = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let actual = ffmpeg.probe_duration(&pair.media).await;
        let cues = if pair.subtitle.is_file() {
            match srt::read_file(&pair.subtitle).await {
                Ok(cues) => cues,
                Err(err) => {
                    logw(format!("Skipping unreadable subtitle {}: {:#}", pair.subtitle.display(), err));
                    Vec::new()
                }
            }
        } else {
            logw(format!("Subtitle missing: {}", pair.subtitle.display()));
            Vec::new()
        };

        if actual <= 0.0 {
            logw(format!(
                "Could not measure {}; keeping subtitle timing as written",
                pair.media.display()
            ));
        }
        blocks.push((cues, actual));
    }

    let merged = merge_cues(&blocks);
    srt::write_file(output, &merged).await?;
    logi(format!(
        "Merged {} subtitle file(s) into {} ({} cues)",
        pairs.len(),
        output.display(),
        merged.len()
    ));
    Ok(merged.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64, end: f64, text: &str) -> SubtitleCue {
        SubtitleCue::new(start, end, text)
    }

    #[test]
    fn rescales_to_measured_duration_and_accumulates_offsets() {
        let blocks = vec![
            (vec![cue(0.0, 2.0, "a"), cue(2.0, 4.0, "b")], 5.0),
            (vec![cue(0.0, 3.0, "c")], 2.5),
            (vec![cue(0.0, 1.0, "d")], 1.0),
        ];
        let merged = merge_cues(&blocks);
        let expected = [(0.0, 2.5, "a"), (2.5, 5.0, "b"), (5.0, 7.5, "c"), (7.5, 8.5, "d")];
        assert_eq!(merged.len(), expected.len());
        for (got, (start, end, text)) in merged.iter().zip(expected) {
            assert!((got.start - start).abs() < 1e-9, "{got:?}");
            assert!((got.end - end).abs() < 1e-9, "{got:?}");
            assert_eq!(got.text, text);
        }
    }

    #[test]
    fn unmeasured_media_falls_back_to_cue_timing() {
        let blocks = vec![
            (vec![cue(0.0, 4.0, "a")], 0.0),
            (vec![cue(0.0, 2.0, "b")], 2.0),
        ];
        let merged = merge_cues(&blocks);
        assert_eq!(merged[0], cue(0.0, 4.0, "a"));
        assert_eq!(merged[1], cue(4.0, 6.0, "b"));
    }

    #[test]
    fn empty_block_still_advances_offset() {
        let blocks = vec![
            (Vec::new(), 3.0),
            (vec![cue(0.0, 1.0, "x")], 2.0),
        ];
        let merged = merge_cues(&blocks);
        assert_eq!(merged, vec![cue(3.0, 5.0, "x")]);
    }

    #[test]
    fn merge_is_a_pure_function_of_inputs() {
        let blocks = vec![
            (vec![cue(0.0, 1.7, "a"), cue(1.7, 3.3, "b")], 3.41),
            (vec![cue(0.0, 2.2, "c")], 2.05),
        ];
        let first = srt::render(&merge_cues(&blocks));
        let second = srt::render(&merge_cues(&blocks));
        assert_eq!(first, second);
    }

    #[test]
    fn merged_cues_never_overlap() {
        let blocks = vec![
            (vec![cue(0.0, 1.3, "a"), cue(1.3, 4.1, "b")], 3.97),
            (vec![cue(0.0, 2.0, "c"), cue(2.0, 6.0, "d")], 6.3),
        ];
        let merged = merge_cues(&blocks);
        for pair in merged.windows(2) {
            assert!(pair[0].end <= pair[1].start + 1e-9);
        }
        assert!((merged.last().unwrap().end - (3.97 + 6.3)).abs() < 1e-9);
    }
}
