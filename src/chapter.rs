use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInfo {
    #[serde(rename = "章节号", deserialize_with = "label")]
    pub number: String,
    #[serde(rename = "标题", default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenePlan {
    #[serde(rename = "场景编号", deserialize_with = "label")]
    pub id: String,
    #[serde(rename = "图片提示词", default)]
    pub image_prompt: String,
    #[serde(rename = "场景图片url", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphPlan {
    #[serde(rename = "序号", deserialize_with = "label")]
    pub index: String,
    #[serde(rename = "段落标题", default)]
    pub title: String,
    #[serde(rename = "场景文案", default)]
    pub narration: String,
    #[serde(rename = "场景列表", default)]
    pub scenes: Vec<ScenePlan>,
}

/// One chapter breakdown as produced by the LLM stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterDoc {
    #[serde(rename = "章节信息")]
    pub info: ChapterInfo,
    #[serde(rename = "场景拆解", default)]
    pub paragraphs: Vec<ParagraphPlan>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Label {
    Text(String),
    Int(i64),
    Float(f64),
}

// Numbers show up both as JSON strings and JSON numbers.
fn label<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Label::deserialize(deserializer)? {
        Label::Text(s) => s.trim().to_string(),
        Label::Int(n) => n.to_string(),
        Label::Float(f) => f.to_string(),
    })
}

/// Makes a title usable as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_matches('.').to_string()
}

/// Leading integer of a name such as `3-雨夜`, if any.
pub fn numeric_prefix(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// First run of ASCII digits anywhere in the name.
pub fn first_number(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Sort key for chapter directories: numbered names first, by number, then
/// the rest by name.
pub fn chapter_sort_key(name: &str) -> (bool, u64, String) {
    match first_number(name) {
        Some(n) => (false, n, name.to_string()),
        None => (true, 0, name.to_string()),
    }
}

impl ChapterInfo {
    /// `第12章` -> `12`.
    pub fn bare_number(&self) -> String {
        self.number.replace('第', "").replace('章', "").trim().to_string()
    }

    pub fn folder_name(&self) -> String {
        let num = sanitize_component(&self.bare_number());
        let title = sanitize_component(&self.title);
        if title.is_empty() {
            format!("{}章", num)
        } else {
            format!("{}-{}", num, title)
        }
    }
}

impl ParagraphPlan {
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}",
            sanitize_component(&self.index),
            sanitize_component(&self.title)
        )
    }
}

impl ChapterDoc {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .with_context(|| "Failed to parse chapter JSON")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read chapter file: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Chapter file: {}", path.display()))
    }

    /// Checkpoint key for one paragraph of this chapter.
    pub fn progress_key(&self, paragraph: &ParagraphPlan) -> String {
        format!("{}-{}", self.info.number, paragraph.title)
    }

    /// Paragraphs in ascending numeric order of their index; unnumbered ones
    /// keep their document order after the numbered ones.
    pub fn ordered_paragraphs(&self) -> Vec<&ParagraphPlan> {
        let mut out: Vec<&ParagraphPlan> = self.paragraphs.iter().collect();
        out.sort_by_key(|p| match numeric_prefix(&p.index) {
            Some(n) => (false, n),
            None => (true, 0),
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "章节信息": {"章节号": "第3章", "标题": "雨夜"},
        "场景拆解": [
            {
                "序号": 2,
                "段落标题": "追逐",
                "场景文案": "他跑进了巷子。",
                "场景列表": [{"场景编号": 1, "图片提示词": "dark alley"}]
            },
            {
                "序号": "1",
                "段落标题": "开端",
                "场景文案": "今天天气很好。",
                "场景列表": [
                    {"场景编号": "1", "图片提示词": "sunny street"},
                    {"场景编号": 2, "图片提示词": "cafe", "场景图片url": "http://x/y.jpg"}
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_mixed_number_and_string_labels() {
        let doc = ChapterDoc::from_json(SAMPLE).unwrap();
        assert_eq!(doc.info.number, "第3章");
        assert_eq!(doc.paragraphs.len(), 2);
        assert_eq!(doc.paragraphs[0].index, "2");
        assert_eq!(doc.paragraphs[1].scenes[1].id, "2");
        assert_eq!(
            doc.paragraphs[1].scenes[1].image_url.as_deref(),
            Some("http://x/y.jpg")
        );
        assert!(doc.paragraphs[1].scenes[0].image_url.is_none());
    }

    #[test]
    fn folder_and_dir_names() {
        let doc = ChapterDoc::from_json(SAMPLE).unwrap();
        assert_eq!(doc.info.folder_name(), "3-雨夜");
        assert_eq!(doc.paragraphs[1].dir_name(), "1-开端");

        let untitled = ChapterInfo {
            number: "第7章".to_string(),
            title: String::new(),
        };
        assert_eq!(untitled.folder_name(), "7章");
    }

    #[test]
    fn progress_key_uses_raw_chapter_number() {
        let doc = ChapterDoc::from_json(SAMPLE).unwrap();
        assert_eq!(doc.progress_key(&doc.paragraphs[0]), "第3章-追逐");
    }

    #[test]
    fn paragraphs_are_ordered_numerically() {
        let doc = ChapterDoc::from_json(SAMPLE).unwrap();
        let titles: Vec<&str> = doc
            .ordered_paragraphs()
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, ["开端", "追逐"]);
    }

    #[test]
    fn sanitizes_path_separators() {
        assert_eq!(sanitize_component(" a/b\\c "), "a_b_c");
        assert_eq!(sanitize_component(".."), "");
    }

    #[test]
    fn chapter_sort_key_orders_by_first_number() {
        let mut names = vec!["10-终章", "2-雨夜", "序章", "1-开端"];
        names.sort_by_key(|n| chapter_sort_key(n));
        assert_eq!(names, ["1-开端", "2-雨夜", "10-终章", "序章"]);
        assert_eq!(first_number("chapter_12_detailed"), Some(12));
        assert_eq!(numeric_prefix("x12"), None);
    }

    #[test]
    fn missing_chapter_info_is_an_error() {
        assert!(ChapterDoc::from_json(r#"{"场景拆解": []}"#).is_err());
    }
}
