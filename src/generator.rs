use crate::api::{ImageGenerator, ImageRequest, SpeechSynthesizer};
use crate::chapter::{self, ChapterDoc, ParagraphPlan};
use crate::config::Config;
use crate::ffmpeg::Ffmpeg;
use crate::merge::{self, SubtitlePair};
use crate::paragraph::build_paragraph_video;
use crate::progress::ProgressStore;
use crate::srt;
use crate::subtitle::{self, Segmenter};
use crate::{loge, logi, logok, logw};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use walkdir::WalkDir;

pub const PARAGRAPH_SUBTITLE: &str = "paragraph_subtitle.srt";
pub const PARAGRAPH_VIDEO: &str = "paragraph_video.mp4";
pub const CHAPTER_SUBTITLE: &str = "chapter_subtitle.srt";
pub const CHAPTER_VIDEO: &str = "chapter_video.mp4";
pub const MOVIE_SUBTITLE: &str = "complete_movie_subtitle.srt";
pub const MOVIE_VIDEO: &str = "complete_movie.mp4";

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create dir {}", path.display()))
}

/// Equal display windows for `count` scenes over `duration` seconds.
pub fn scene_windows(duration: f64, count: usize) -> Vec<(f64, f64)> {
    if count == 0 {
        return Vec::new();
    }
    let step = duration / count as f64;
    (0..count)
        .map(|i| {
            let end = if i + 1 == count { duration } else { step * (i + 1) as f64 };
            (step * i as f64, end)
        })
        .collect()
}

/// Artifacts of one paragraph after processing.
#[derive(Debug, Clone)]
pub struct ParagraphOutcome {
    pub title: String,
    pub audio: PathBuf,
    pub subtitle: PathBuf,
    pub video: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterReport {
    pub folder: PathBuf,
    pub paragraphs: usize,
    pub paragraph_videos: Vec<PathBuf>,
    pub chapter_video: Option<PathBuf>,
}

/// Sequential chapter/movie pipeline.
pub struct Pipeline {
    cfg: Config,
    ffmpeg: Ffmpeg,
    segmenter: Segmenter,
    speech: Arc<dyn SpeechSynthesizer>,
    images: Arc<dyn ImageGenerator>,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        speech: Arc<dyn SpeechSynthesizer>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            ffmpeg: Ffmpeg::new(cfg.video.clone()),
            segmenter: Segmenter::new(cfg.subtitle.clone()),
            cfg,
            speech,
            images,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn ffmpeg(&self) -> &Ffmpeg {
        &self.ffmpeg
    }

    fn within_tolerance(&self, a: f64, b: f64) -> bool {
        a > 0.0 && (a - b).abs() <= self.cfg.video.cache_tolerance_secs
    }

    /// Chapter files to render: the configured list, or every
    /// `*_processed.json` under the chapters directory.
    pub async fn chapter_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.cfg.paths.chapters_dir;
        if !self.cfg.paths.chapter_files.is_empty() {
            return Ok(self
                .cfg
                .paths
                .chapter_files
                .iter()
                .map(|name| dir.join(name))
                .collect());
        }

        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_chapter = path
                .file_name()
                .and_then(OsStr::to_str)
                .map(|n| n.ends_with("_processed.json"))
                .unwrap_or(false);
            if is_chapter && path.is_file() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn process_all_chapters(&self) -> Result<Vec<ChapterReport>> {
        let files = self.chapter_files().await?;
        logi(format!("Processing {} chapter file(s)", files.len()));

        let mut reports = Vec::new();
        for file in files {
            if !file_exists(&file).await {
                logw(format!("Chapter file not found: {}", file.display()));
                continue;
            }
            match self.process_chapter_file(&file).await {
                Ok(report) => reports.push(report),
                Err(err) => loge(format!("Chapter {} failed: {:#}", file.display(), err)),
            }
        }
        Ok(reports)
    }

    pub async fn process_chapter_file(&self, path: &Path) -> Result<ChapterReport> {
        let doc = ChapterDoc::load(path).await?;
        self.process_chapter(&doc).await
    }

    pub async fn process_chapter(&self, doc: &ChapterDoc) -> Result<ChapterReport> {
        let chapter_dir = self.cfg.paths.output_dir.join(doc.info.folder_name());
        ensure_dir(&chapter_dir).await?;
        let mut progress = ProgressStore::load(&chapter_dir).await;

        let paragraphs = doc.ordered_paragraphs();
        logi(format!(
            "=== {} -> {} ({} paragraph(s)) ===",
            doc.info.number,
            chapter_dir.display(),
            paragraphs.len()
        ));

        let mut pairs = Vec::new();
        let mut videos = Vec::new();
        for para in &paragraphs {
            match self
                .process_paragraph(doc, para, &chapter_dir, &mut progress)
                .await
            {
                Ok(outcome) => {
                    if let Some(video) = outcome.video {
                        // Every concatenated video keeps its slot in the merge.
                        pairs.push(SubtitlePair::new(&outcome.subtitle, &video));
                        videos.push(video);
                    } else {
                        logw(format!("No video for paragraph {}", outcome.title));
                    }
                }
                Err(err) => {
                    loge(format!("Paragraph {} abandoned: {:#}", para.title, err));
                }
            }
            if let Err(err) = progress.save().await {
                logw(format!("Could not save progress: {:#}", err));
            }
        }

        let mut report = ChapterReport {
            folder: chapter_dir.clone(),
            paragraphs: paragraphs.len(),
            paragraph_videos: videos.clone(),
            chapter_video: None,
        };

        if videos.is_empty() {
            logw(format!("No paragraph videos; skipping chapter video for {}", doc.info.number));
            return Ok(report);
        }

        merge::merge_subtitle_files(&self.ffmpeg, &pairs, &chapter_dir.join(CHAPTER_SUBTITLE))
            .await?;

        report.chapter_video = self
            .build_chapter_video(&videos, &chapter_dir.join(CHAPTER_VIDEO))
            .await?;
        logok(format!(
            "Chapter done: {} ({} paragraph video(s))",
            chapter_dir.display(),
            videos.len()
        ));
        Ok(report)
    }

    async fn process_paragraph(
        &self,
        doc: &ChapterDoc,
        para: &ParagraphPlan,
        chapter_dir: &Path,
        progress: &mut ProgressStore,
    ) -> Result<ParagraphOutcome> {
        let para_dir = chapter_dir.join(para.dir_name());
        ensure_dir(&para_dir).await?;
        let key = doc.progress_key(para);
        logi(format!("Paragraph {}", key));

        // narration
        let audio = para_dir.join(format!("audio.{}", self.cfg.tts.format));
        let mut duration = 0.0;
        if non_empty_file(&audio).await {
            duration = self.ffmpeg.probe_duration(&audio).await;
            if duration > 0.0 {
                logi(format!("Reusing narration: {}", audio.display()));
            } else {
                logw(format!("Narration unreadable, regenerating: {}", audio.display()));
            }
        }
        if duration <= 0.0 {
            if para.narration.trim().is_empty() {
                anyhow::bail!("paragraph has no narration text");
            }
            self.speech
                .synthesize(&para.narration, &audio)
                .await
                .with_context(|| format!("narration for {}", key))?;
            progress.entry_mut(&key).audio_done = true;
            progress.save().await?;
            duration = self.ffmpeg.probe_duration(&audio).await;
        }
        if duration <= 0.0 {
            anyhow::bail!("narration has no measurable duration: {}", audio.display());
        }

        // scene images
        let mut scene_files = Vec::with_capacity(para.scenes.len());
        for scene in &para.scenes {
            let image = para_dir.join(format!("scene_{}.jpg", chapter::sanitize_component(&scene.id)));
            if !non_empty_file(&image).await {
                let request = ImageRequest {
                    prompt: scene.image_prompt.clone(),
                    source_image_url: scene.image_url.clone(),
                };
                self.images
                    .generate(&request, &image)
                    .await
                    .with_context(|| format!("scene {} of {}", scene.id, key))?;
            }
            scene_files.push(image);
            let entry = progress.entry_mut(&key);
            entry.scene_files = scene_files.iter().map(|p| p.display().to_string()).collect();
        }
        progress.save().await?;

        // subtitles
        let cues = self.segmenter.cues(&para.narration, duration, 0.0);
        let subtitle = para_dir.join(PARAGRAPH_SUBTITLE);
        if cues.is_empty() {
            logw(format!("No subtitle cues for {}", key));
            let _ = fs::remove_file(&subtitle).await;
        } else {
            srt::write_file(&subtitle, &cues).await?;
            for (scene, (start, end)) in para
                .scenes
                .iter()
                .zip(scene_windows(duration, para.scenes.len()))
            {
                let scene_cues = subtitle::cues_in_window(&cues, start, end);
                let path = para_dir.join(format!(
                    "scene_{}_subtitle.srt",
                    chapter::sanitize_component(&scene.id)
                ));
                srt::write_file(&path, &scene_cues).await?;
            }
        }

        // video
        let video_path = para_dir.join(PARAGRAPH_VIDEO);
        let mut video = None;
        if non_empty_file(&video_path).await {
            let existing = self.ffmpeg.probe_duration(&video_path).await;
            if self.within_tolerance(existing, duration) {
                logi(format!("Reusing paragraph video: {}", video_path.display()));
                video = Some(video_path.clone());
            } else {
                logw(format!(
                    "Paragraph video out of date (video {:.2}s, audio {:.2}s)",
                    existing, duration
                ));
            }
        }
        if video.is_none() {
            video = build_paragraph_video(&self.ffmpeg, &audio, &scene_files, &video_path).await?;
        }
        progress.entry_mut(&key).video_done = video.is_some();

        Ok(ParagraphOutcome {
            title: para.title.clone(),
            audio,
            subtitle,
            video,
        })
    }

    /// Reuses the chapter video when its length matches the paragraphs;
    /// otherwise concatenates them and, when a track is configured, mixes in
    /// background music.
    async fn build_chapter_video(&self, videos: &[PathBuf], out: &Path) -> Result<Option<PathBuf>> {
        let mut expected = 0.0;
        for video in videos {
            expected += self.ffmpeg.probe_duration(video).await;
        }

        if non_empty_file(out).await {
            let existing = self.ffmpeg.probe_duration(out).await;
            if self.within_tolerance(existing, expected) {
                logi(format!("Reusing chapter video: {}", out.display()));
                return Ok(Some(out.to_path_buf()));
            }
            logw(format!(
                "Chapter video out of date (video {:.2}s, expected {:.2}s)",
                existing, expected
            ));
        }

        let dir = out.parent().unwrap_or_else(|| Path::new("."));
        let pid = std::process::id();
        let manifest = dir.join(format!(".chapter_concat_{}.txt", pid));
        let bgm = &self.cfg.video.bgm_path;

        if !non_empty_file(bgm).await {
            logi(format!("No background music at {}; plain concat", bgm.display()));
            let ok = self.ffmpeg.concat_copy(videos, &manifest, out).await?;
            return Ok(ok.then(|| out.to_path_buf()));
        }

        let joined = dir.join(format!(".chapter_joined_{}.mp4", pid));
        if !self.ffmpeg.concat_copy(videos, &manifest, &joined).await? {
            return Ok(None);
        }

        let mixed = self.ffmpeg.mix_bgm(&joined, bgm, out).await?;
        if mixed {
            let _ = fs::remove_file(&joined).await;
            logok(format!("Chapter video with background music: {}", out.display()));
            return Ok(Some(out.to_path_buf()));
        }

        logw("Background music mix failed; keeping narration-only chapter video");
        fs::rename(&joined, out)
            .await
            .with_context(|| format!("move {} -> {}", joined.display(), out.display()))?;
        Ok(Some(out.to_path_buf()))
    }

    /// Chapter directories holding a chapter video, in chapter order.
    pub fn rendered_chapters(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = WalkDir::new(&self.cfg.paths.output_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .filter(|dir| {
                std::fs::metadata(dir.join(CHAPTER_VIDEO))
                    .map(|m| m.len() > 0)
                    .unwrap_or(false)
            })
            .collect();
        dirs.sort_by_key(|dir| {
            chapter::chapter_sort_key(&dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
        });
        dirs
    }

    /// Concatenates every rendered chapter into the complete movie and merges
    /// their subtitles.
    ///
    /// Background music is not mixed here: chapter videos already carry it,
    /// and a second mix would stack two copies of the track.
    pub async fn create_complete_movie(&self) -> Result<Option<PathBuf>> {
        let output_dir = &self.cfg.paths.output_dir;
        let chapters = self.rendered_chapters();
        if chapters.is_empty() {
            logw(format!("No chapter videos under {}", output_dir.display()));
            return Ok(None);
        }

        let videos: Vec<PathBuf> = chapters.iter().map(|d| d.join(CHAPTER_VIDEO)).collect();
        // One pair per concatenated chapter, subtitle or not, so later cues
        // are offset by every video in front of them.
        let pairs: Vec<SubtitlePair> = chapters
            .iter()
            .map(|dir| SubtitlePair::new(dir.join(CHAPTER_SUBTITLE), dir.join(CHAPTER_VIDEO)))
            .collect();
        merge::merge_subtitle_files(&self.ffmpeg, &pairs, &output_dir.join(MOVIE_SUBTITLE))
            .await?;

        let movie = output_dir.join(MOVIE_VIDEO);
        let manifest = output_dir.join(format!(".movie_concat_{}.txt", std::process::id()));
        if !self.ffmpeg.concat_copy(&videos, &manifest, &movie).await? {
            loge("Complete movie concat failed");
            return Ok(None);
        }

        let total = self.ffmpeg.probe_duration(&movie).await;
        logok(format!(
            "Complete movie: {} ({} chapter(s), {:.1} min)",
            movie.display(),
            chapters.len(),
            total / 60.0
        ));
        Ok(Some(movie))
    }
}
