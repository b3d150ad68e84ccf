use crate::ffmpeg::Ffmpeg;
use crate::motion::MotionProfile;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

async fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path).await;
    }
}

/// Renders one clip per image, each `audio_duration / n` long, concatenates
/// them and lays the narration under the result.
///
/// Returns `None` (and leaves nothing behind) when there are no usable
/// images, the audio cannot be measured, or any encoder step fails.
pub async fn build_paragraph_video(
    ffmpeg: &Ffmpeg,
    audio: &Path,
    images: &[PathBuf],
    out_mp4: &Path,
) -> Result<Option<PathBuf>> {
    let mut usable = Vec::with_capacity(images.len());
    for image in images {
        if non_empty_file(image).await {
            usable.push(image.clone());
        } else {
            logw(format!("Scene image missing, skipped: {}", image.display()));
        }
    }
    if usable.is_empty() {
        logw(format!("No scene images for {}", out_mp4.display()));
        return Ok(None);
    }

    let total = ffmpeg.probe_duration(audio).await;
    if total <= 0.0 {
        logw(format!("Narration has no measurable duration: {}", audio.display()));
        return Ok(None);
    }
    let per_scene = total / usable.len() as f64;

    let work_dir = out_mp4
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create dir {}", work_dir.display()))?;

    let pid = std::process::id();
    let profiles: Vec<MotionProfile> = {
        let mut rng = rand::thread_rng();
        usable.iter().map(|_| MotionProfile::random(&mut rng)).collect()
    };

    let mut segments = Vec::with_capacity(usable.len());
    for (i, (image, profile)) in usable.iter().zip(&profiles).enumerate() {
        let segment = work_dir.join(format!(".segment_{}_{}.mp4", pid, i));
        segments.push(segment.clone());
        let rendered = match ffmpeg
            .render_scene_segment(image, per_scene, *profile, &segment)
            .await
        {
            Ok(ok) => ok,
            Err(err) => {
                logw(format!("Scene {} render failed: {:#}", image.display(), err));
                false
            }
        };
        if !rendered {
            remove_all(&segments).await;
            return Ok(None);
        }
        logi(format!(
            "Scene {}/{} ({}, {:.2}s) -> {}",
            i + 1,
            usable.len(),
            profile.name(),
            per_scene,
            segment.display()
        ));
    }

    let manifest = work_dir.join(format!(".concat_{}.txt", pid));
    let silent = work_dir.join(format!(".silent_{}.mp4", pid));
    let mut built = ffmpeg.concat_copy(&segments, &manifest, &silent).await;
    if matches!(built, Ok(true)) {
        built = ffmpeg.mux_narration(&silent, audio, out_mp4).await;
    }

    remove_all(&segments).await;
    let _ = fs::remove_file(&silent).await;

    let built = built.unwrap_or_else(|err| {
        logw(format!("Assembling {} failed: {:#}", out_mp4.display(), err));
        false
    });
    if !built {
        let _ = fs::remove_file(&manifest).await;
        let _ = fs::remove_file(out_mp4).await;
        return Ok(None);
    }

    logok(format!("Paragraph video: {} ({:.2}s)", out_mp4.display(), total));
    Ok(Some(out_mp4.to_path_buf()))
}
