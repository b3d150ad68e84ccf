use crate::config::VideoSettings;
use crate::motion::{self, MotionProfile};
use crate::{logi, logw};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

const STDERR_TAIL: usize = 800;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd
        .output()
        .await
        .with_context(|| format!("Command execution failed: {}", args[0]))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = {
            let chars: Vec<char> = stderr.trim().chars().collect();
            chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
        };
        return Err(anyhow::anyhow!(
            "Command failed ({}): {:?}\n{}",
            output.status,
            args,
            tail
        ));
    }

    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Concat-demuxer manifest: one absolute `file '...'` line per clip, in order.
pub fn concat_manifest(clips: &[PathBuf]) -> String {
    let mut out = String::new();
    for clip in clips {
        let path = absolute(clip).display().to_string().replace('\'', "'\\''");
        out.push_str(&format!("file '{}'\n", path));
    }
    out
}

/// The external encoder and prober, configured once.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    video: VideoSettings,
}

impl Ffmpeg {
    pub fn new(video: VideoSettings) -> Self {
        Self { video }
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.video
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            self.video.ffmpeg.clone(),
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ]
    }

    pub async fn is_available(&self) -> bool {
        match Command::new(&self.video.ffmpeg).arg("-version").output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    /// Duration in seconds, or 0.0 when the file cannot be probed.
    pub async fn probe_duration(&self, path: &Path) -> f64 {
        let output = match Command::new(&self.video.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                logw(format!("ffprobe could not run for {}: {}", path.display(), err));
                return 0.0;
            }
        };

        if !output.status.success() {
            return 0.0;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        match text.trim().lines().next().map(str::trim).map(str::parse::<f64>) {
            Some(Ok(duration)) if duration.is_finite() && duration > 0.0 => duration,
            _ => 0.0,
        }
    }

    /// Renders one still image as a moving clip of `duration` seconds.
    pub async fn render_scene_segment(
        &self,
        image: &Path,
        duration: f64,
        profile: MotionProfile,
        out_mp4: &Path,
    ) -> Result<bool> {
        let frames = motion::frame_count(duration, self.video.fps);
        let filter = motion::scene_filter(profile, frames, &self.video);

        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(&absolute(image)),
            "-vf".to_string(),
            filter,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.video.preset.clone(),
            "-crf".to_string(),
            self.video.crf.to_string(),
            "-t".to_string(),
            format!("{:.3}", duration),
            display(out_mp4),
        ]);

        run_cmd(&args).await?;
        Ok(out_mp4.exists())
    }

    /// Stream-copy concatenation of `clips` in the given order. The manifest is
    /// always removed; a failed run leaves no output behind.
    pub async fn concat_copy(
        &self,
        clips: &[PathBuf],
        manifest: &Path,
        out_mp4: &Path,
    ) -> Result<bool> {
        if clips.is_empty() {
            return Ok(false);
        }

        fs::write(manifest, concat_manifest(clips))
            .await
            .with_context(|| format!("write concat manifest: {}", manifest.display()))?;

        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            display(manifest),
            "-c".to_string(),
            "copy".to_string(),
            display(out_mp4),
        ]);

        let result = run_cmd(&args).await;
        let _ = fs::remove_file(manifest).await;

        if let Err(err) = result {
            logw(format!("Concat failed for {}: {:#}", out_mp4.display(), err));
            let _ = fs::remove_file(out_mp4).await;
            return Ok(false);
        }

        logi(format!("Concatenated {} clip(s) -> {}", clips.len(), out_mp4.display()));
        Ok(out_mp4.exists())
    }

    /// Puts `audio` under the silent `video`, copying the video stream.
    pub async fn mux_narration(&self, video: &Path, audio: &Path, out_mp4: &Path) -> Result<bool> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(video),
            "-i".to_string(),
            display(audio),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
            display(out_mp4),
        ]);

        if let Err(err) = run_cmd(&args).await {
            logw(format!("Mux failed for {}: {:#}", out_mp4.display(), err));
            let _ = fs::remove_file(out_mp4).await;
            return Ok(false);
        }
        Ok(out_mp4.exists())
    }

    /// Mixes a looped, attenuated background track under the video's own audio.
    pub async fn mix_bgm(&self, video: &Path, bgm: &Path, out_mp4: &Path) -> Result<bool> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            display(video),
            "-i".to_string(),
            display(&absolute(bgm)),
            "-filter_complex".to_string(),
            bgm_filter(self.video.bgm_volume),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "[audio_out]".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
            display(out_mp4),
        ]);

        if let Err(err) = run_cmd(&args).await {
            logw(format!("Background music mix failed for {}: {:#}", out_mp4.display(), err));
            let _ = fs::remove_file(out_mp4).await;
            return Ok(false);
        }
        Ok(out_mp4.exists())
    }
}

fn bgm_filter(volume: f64) -> String {
    format!(
        "[1:a]volume={},aloop=loop=-1:size=2e+09[bgm];[0:a][bgm]amix=inputs=2:duration=first:dropout_transition=2[audio_out]",
        volume
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn manifest_preserves_order_and_uses_absolute_paths() {
        let clips = vec![
            PathBuf::from("/v/a.mp4"),
            PathBuf::from("/v/b.mp4"),
            PathBuf::from("/v/c.mp4"),
        ];
        assert_eq!(
            concat_manifest(&clips),
            "file '/v/a.mp4'\nfile '/v/b.mp4'\nfile '/v/c.mp4'\n"
        );

        let relative = concat_manifest(&[PathBuf::from("rel/x.mp4")]);
        let line = relative.trim_end();
        assert!(line.starts_with("file '/"), "{line}");
        assert!(line.ends_with("rel/x.mp4'"), "{line}");
    }

    #[test]
    fn manifest_escapes_single_quotes() {
        let out = concat_manifest(&[PathBuf::from("/v/it's.mp4")]);
        assert_eq!(out, "file '/v/it'\\''s.mp4'\n");
    }

    #[test]
    fn bgm_filter_loops_and_attenuates() {
        let f = bgm_filter(0.3);
        assert!(f.starts_with("[1:a]volume=0.3,aloop=loop=-1"));
        assert!(f.contains("amix=inputs=2:duration=first"));
        assert!(f.ends_with("[audio_out]"));
    }

    #[tokio::test]
    #[serial]
    async fn probe_of_missing_file_is_zero() {
        let ffmpeg = Ffmpeg::new(VideoSettings::default());
        let d = ffmpeg
            .probe_duration(Path::new("/definitely/not/here.mp4"))
            .await;
        assert_eq!(d, 0.0);
    }

    #[tokio::test]
    #[serial]
    async fn probe_with_missing_binary_is_zero() {
        let video = VideoSettings {
            ffprobe: "/nonexistent/ffprobe-binary".to_string(),
            ..VideoSettings::default()
        };
        let d = Ffmpeg::new(video).probe_duration(Path::new("x.mp4")).await;
        assert_eq!(d, 0.0);
    }

    #[tokio::test]
    #[serial]
    async fn failed_concat_removes_manifest_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("list.txt");
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"stale").unwrap();

        let video = VideoSettings {
            ffmpeg: "/nonexistent/ffmpeg-binary".to_string(),
            ..VideoSettings::default()
        };
        let ffmpeg = Ffmpeg::new(video);
        let ok = ffmpeg
            .concat_copy(&[dir.path().join("a.mp4")], &manifest, &out)
            .await
            .unwrap();
        assert!(!ok);
        assert!(!manifest.exists());
        assert!(!out.exists());
    }
}
