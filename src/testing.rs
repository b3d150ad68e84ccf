//! Stand-in encoder binaries for tests that drive the pipeline end to end.

use crate::config::VideoSettings;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// Fake ffmpeg/ffprobe living in `dir`.
pub struct FakeTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub log: PathBuf,
}

impl FakeTools {
    /// ffmpeg logs its arguments and writes a non-empty file at its last
    /// argument; ffprobe prints `duration` for every file.
    pub fn working(dir: &Path, duration: f64) -> Self {
        let log = dir.join("ffmpeg.log");
        let ffmpeg = dir.join("fake-ffmpeg");
        let ffprobe = dir.join("fake-ffprobe");
        write_script(
            &ffmpeg,
            &format!(
                "echo \"$@\" >> '{}'\nfor a in \"$@\"; do last=\"$a\"; done\necho data > \"$last\"\n",
                log.display()
            ),
        );
        write_script(&ffprobe, &format!("echo {duration}\n"));
        Self { ffmpeg, ffprobe, log }
    }

    /// ffmpeg logs its arguments and fails.
    pub fn failing(dir: &Path, duration: f64) -> Self {
        let tools = Self::working(dir, duration);
        write_script(
            &tools.ffmpeg,
            &format!("echo \"$@\" >> '{}'\nexit 1\n", tools.log.display()),
        );
        tools
    }

    /// Like `working`, except that concat invocations fail.
    pub fn failing_concat(dir: &Path, duration: f64) -> Self {
        let tools = Self::working(dir, duration);
        write_script(
            &tools.ffmpeg,
            &format!(
                "echo \"$@\" >> '{}'\ncase \"$*\" in *\"-f concat\"*) exit 1;; esac\nfor a in \"$@\"; do last=\"$a\"; done\necho data > \"$last\"\n",
                tools.log.display()
            ),
        );
        tools
    }

    pub fn video_settings(&self) -> VideoSettings {
        VideoSettings {
            ffmpeg: self.ffmpeg.display().to_string(),
            ffprobe: self.ffprobe.display().to_string(),
            ..VideoSettings::default()
        }
    }

    /// Logged ffmpeg invocations, one per line.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
