//! Narration segmenting and cue timing.
//!
//! Narration is cut into sentence-like units, each unit gets a share of the
//! target duration proportional to its length, and the cues are laid out back
//! to back so that they exactly cover `[start, start + duration]`.

use crate::config::SubtitleSettings;
use crate::srt::SubtitleCue;

const TERMINALS: &[char] = &['。', '！', '？', '…', '!', '?'];
const OPENING_QUOTES: &[char] = &['“', '‘', '「', '『'];
const CLOSING_QUOTES: &[char] = &['”', '’', '」', '』'];
const COMMAS: &[char] = &['，', '、', ','];
const STRAY_QUOTES: &[char] = &['"', '`'];
const FORCE_BREAKS: &[char] = &['，', '、', ' ', '的', '了', '在'];

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    settings: SubtitleSettings,
}

impl Segmenter {
    pub fn new(settings: SubtitleSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SubtitleSettings {
        &self.settings
    }

    /// Splits narration into display units.
    pub fn split_units(&self, text: &str) -> Vec<String> {
        let text = normalize(text);
        if text.is_empty() {
            return Vec::new();
        }

        let mut units = self.split_sentences(&text);
        let text_len = char_len(&text);

        if units.len() <= 1 && text_len > self.settings.comma_split_min_chars {
            units = split_on_commas(&text);
        }
        if units.len() <= 1 && text_len > self.settings.max_unit_chars {
            units = force_split(&text, self.settings.max_unit_chars);
        }

        let units: Vec<String> = units
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| char_len(u) >= self.settings.min_unit_chars)
            .collect();

        if units.is_empty() {
            return vec![text];
        }
        units
    }

    /// Cues covering `[start, start + duration]` with no gaps. Empty text or a
    /// non-positive duration yields no cues.
    pub fn cues(&self, text: &str, duration: f64, start: f64) -> Vec<SubtitleCue> {
        if duration <= 0.0 || !duration.is_finite() {
            return Vec::new();
        }
        let units = self.split_units(text);
        if units.is_empty() {
            return Vec::new();
        }

        let durations = self.allocate(&units, duration);
        let end_of_all = start + duration;
        let last = units.len() - 1;
        let mut cursor = start;
        let mut cues = Vec::with_capacity(units.len());
        for (i, (unit, d)) in units.into_iter().zip(durations).enumerate() {
            let end = if i == last { end_of_all } else { cursor + d };
            cues.push(SubtitleCue::new(cursor, end, unit));
            cursor = end;
        }
        cues
    }

    /// Length-proportional durations, clamped per unit and then rescaled so
    /// they sum to `total`.
    pub fn allocate(&self, units: &[String], total: f64) -> Vec<f64> {
        let s = &self.settings;
        let total_chars: usize = units.iter().map(|u| char_len(u)).sum();
        if units.is_empty() || total_chars == 0 {
            return vec![total / units.len().max(1) as f64; units.len()];
        }

        let clamped: Vec<f64> = units
            .iter()
            .map(|u| {
                let len = char_len(u);
                let raw = total * len as f64 / total_chars as f64;
                if len <= s.short_cue_chars {
                    raw.max(s.short_cue_floor_secs)
                } else if len >= s.long_cue_chars {
                    raw.min(s.long_cue_cap_secs)
                } else {
                    raw
                }
            })
            .collect();

        let sum: f64 = clamped.iter().sum();
        if sum <= 0.0 {
            return vec![total / units.len() as f64; units.len()];
        }
        let scale = total / sum;
        clamped.into_iter().map(|d| d * scale).collect()
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut raw = Vec::new();
        let mut cur = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            cur.push(c);
            i += 1;
            if TERMINALS.contains(&c) {
                // Keep runs like "？！" and the closing quote with the sentence.
                while i < chars.len()
                    && (TERMINALS.contains(&chars[i]) || CLOSING_QUOTES.contains(&chars[i]))
                {
                    cur.push(chars[i]);
                    i += 1;
                }
                push_unit(&mut raw, &mut cur);
            }
        }
        push_unit(&mut raw, &mut cur);

        let mut merged: Vec<String> = Vec::with_capacity(raw.len());
        for unit in raw {
            if let Some(prev) = merged.last_mut() {
                let opens = unit.starts_with(OPENING_QUOTES);
                if opens && (is_unclosed(prev) || char_len(prev) <= self.settings.short_unit_chars)
                {
                    prev.push_str(&unit);
                    continue;
                }
            }
            merged.push(unit);
        }
        merged
    }
}

/// Cues overlapping `[start, end)`, clipped to the window.
pub fn cues_in_window(cues: &[SubtitleCue], start: f64, end: f64) -> Vec<SubtitleCue> {
    cues.iter()
        .filter(|c| c.end > start && c.start < end)
        .map(|c| SubtitleCue::new(c.start.max(start), c.end.min(end), c.text.clone()))
        .filter(|c| c.end > c.start)
        .collect()
}

fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .filter(|c| !STRAY_QUOTES.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_unit(units: &mut Vec<String>, cur: &mut String) {
    let unit = cur.trim();
    if !unit.is_empty() {
        units.push(unit.to_string());
    }
    cur.clear();
}

fn is_unclosed(s: &str) -> bool {
    let opened = s.chars().filter(|c| OPENING_QUOTES.contains(c)).count();
    let closed = s.chars().filter(|c| CLOSING_QUOTES.contains(c)).count();
    opened > closed
}

fn split_on_commas(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();
    for c in text.chars() {
        cur.push(c);
        if COMMAS.contains(&c) {
            push_unit(&mut chunks, &mut cur);
        }
    }
    push_unit(&mut chunks, &mut cur);

    // A chunk left inside an open quote belongs with what follows.
    let mut out: Vec<String> = Vec::with_capacity(chunks.len());
    let mut carry = String::new();
    for chunk in chunks {
        carry.push_str(&chunk);
        if is_unclosed(&carry) {
            continue;
        }
        out.push(std::mem::take(&mut carry));
    }
    if !carry.is_empty() {
        match out.last_mut() {
            Some(last) if char_len(&carry) < 2 => last.push_str(&carry),
            _ => out.push(carry),
        }
    }
    out
}

fn force_split(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(2);
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;

    while chars.len() - start > max_chars {
        let window = &chars[start..start + max_chars];
        let cut = window
            .iter()
            .enumerate()
            .skip(max_chars / 2)
            .rev()
            .find(|(_, c)| FORCE_BREAKS.contains(c))
            .map(|(i, _)| i + 1)
            .unwrap_or(max_chars);
        out.push(window[..cut].iter().collect::<String>());
        start += cut;
    }
    if start < chars.len() {
        out.push(chars[start..].iter().collect::<String>());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn segmenter() -> Segmenter {
        Segmenter::default()
    }

    fn assert_partition(cues: &[SubtitleCue], start: f64, duration: f64) {
        assert!(!cues.is_empty());
        assert!((cues[0].start - start).abs() < EPS);
        assert!((cues.last().unwrap().end - (start + duration)).abs() < EPS);
        for cue in cues {
            assert!(cue.start < cue.end, "non-positive cue {cue:?}");
        }
        for pair in cues.windows(2) {
            assert!(pair[0].end <= pair[1].start + EPS);
            assert!((pair[0].end - pair[1].start).abs() < EPS, "gap between cues");
        }
    }

    #[test]
    fn quoted_sentence_stays_one_cue() {
        let text = "今天天气很好。他笑着说：“你好。”";
        let cues = segmenter().cues(text, 10.0, 0.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "今天天气很好。");
        assert_eq!(cues[1].text, "他笑着说：“你好。”");
        assert_partition(&cues, 0.0, 10.0);
        let t1 = 10.0 * 7.0 / 17.0;
        assert!((cues[0].end - t1).abs() < 1e-6);
    }

    #[test]
    fn opening_quote_after_short_sentence_merges_back() {
        let units = segmenter().split_units("他说。“我们走吧，天快黑了。”");
        assert_eq!(units, vec!["他说。“我们走吧，天快黑了。”"]);
    }

    #[test]
    fn opening_quote_after_unclosed_sentence_merges_back() {
        let text = "他抬起头望着远处的群山大声喊道：“等等我！“我马上就到。”";
        let units = segmenter().split_units(text);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn opening_quote_after_long_closed_sentence_starts_new_cue() {
        let text = "他沿着河岸慢慢地走了很久很久终于停下来。“这里就是我们的家。”";
        let units = segmenter().split_units(text);
        assert_eq!(units.len(), 2);
        assert!(units[1].starts_with('“'));
    }

    #[test]
    fn empty_and_whitespace_text_produce_no_cues() {
        assert!(segmenter().cues("", 5.0, 0.0).is_empty());
        assert!(segmenter().cues("  \n\t ", 5.0, 0.0).is_empty());
    }

    #[test]
    fn non_positive_duration_produces_no_cues() {
        assert!(segmenter().cues("你好。", 0.0, 0.0).is_empty());
        assert!(segmenter().cues("你好。", -1.0, 0.0).is_empty());
    }

    #[test]
    fn whitespace_and_stray_quotes_are_normalized() {
        let units = segmenter().split_units("  他 \n\n 来了。\"真的\"   走了。 ");
        assert_eq!(units, vec!["他 来了。", "真的 走了。"]);
    }

    #[test]
    fn falls_back_to_commas_for_long_single_sentence() {
        let text = "我们走过长长的街道，穿过热闹的市场，来到安静的湖边，看见远处的山峦";
        let units = segmenter().split_units(text);
        assert_eq!(
            units,
            vec![
                "我们走过长长的街道，",
                "穿过热闹的市场，",
                "来到安静的湖边，",
                "看见远处的山峦"
            ]
        );
    }

    #[test]
    fn comma_fallback_keeps_open_quote_with_next_chunk() {
        let text = "他说：“走吧，快点”，然后我们就一起离开了那个地方，再也没有回头看";
        let units = segmenter().split_units(text);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], "他说：“走吧，快点”，");
    }

    #[test]
    fn short_text_without_terminals_is_not_comma_split() {
        let units = segmenter().split_units("风很大，雨也很大");
        assert_eq!(units, vec!["风很大，雨也很大"]);
    }

    #[test]
    fn force_split_prefers_break_characters() {
        let text = format!("{}的{}", "甲".repeat(19), "乙".repeat(20));
        let units = segmenter().split_units(&text);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], format!("{}的", "甲".repeat(19)));
        assert_eq!(units[1], "乙".repeat(20));
    }

    #[test]
    fn force_split_cuts_at_max_without_break_characters() {
        let text = "字".repeat(70);
        let units = segmenter().split_units(&text);
        assert_eq!(units.iter().map(|u| char_len(u)).collect::<Vec<_>>(), vec![30, 30, 10]);
        assert_eq!(units.concat(), text);
    }

    #[test]
    fn tiny_fragments_are_dropped() {
        let units = segmenter().split_units("他来了。嗯");
        assert_eq!(units, vec!["他来了。"]);
    }

    #[test]
    fn all_fragments_tiny_keeps_whole_text() {
        let cues = segmenter().cues("嗯", 3.0, 0.0);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "嗯");
        assert_partition(&cues, 0.0, 3.0);
    }

    #[test]
    fn clamps_are_applied_before_rescaling() {
        let long = format!("{}。", "很".repeat(59));
        let text = format!("好的。{long}");
        let cues = segmenter().cues(&text, 20.0, 0.0);
        assert_eq!(cues.len(), 2);
        let scale = 20.0 / (1.5 + 8.0);
        assert!((cues[0].duration() - 1.5 * scale).abs() < 1e-6);
        assert!((cues[1].duration() - 8.0 * scale).abs() < 1e-6);
        assert_partition(&cues, 0.0, 20.0);
    }

    #[test]
    fn cues_respect_start_offset() {
        let text = "第一句话在这里。第二句话也在这里！第三句呢？";
        let cues = segmenter().cues(text, 10.0, 5.0);
        assert_eq!(cues.len(), 3);
        assert_partition(&cues, 5.0, 10.0);
    }

    #[test]
    fn partition_holds_for_assorted_inputs() {
        let long = "长".repeat(95);
        let texts: [&str; 4] = [
            "天亮了。",
            "他推开门，看见院子里站着一个陌生人。陌生人转过身来！“你终于回来了。”他愣住了……",
            long.as_str(),
            "她轻声问道：“你还记得我吗？”他摇了摇头，说：“不记得了。”",
        ];
        for text in texts {
            for duration in [0.7, 4.0, 33.3] {
                let cues = segmenter().cues(text, duration, 1.25);
                assert_partition(&cues, 1.25, duration);
            }
        }
    }

    #[test]
    fn window_clips_overlapping_cues() {
        let cues = vec![
            SubtitleCue::new(0.0, 2.0, "a"),
            SubtitleCue::new(2.0, 5.0, "b"),
            SubtitleCue::new(5.0, 6.0, "c"),
        ];
        let window = cues_in_window(&cues, 1.0, 5.0);
        assert_eq!(
            window,
            vec![SubtitleCue::new(1.0, 2.0, "a"), SubtitleCue::new(2.0, 5.0, "b")]
        );
    }
}
