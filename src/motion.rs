use crate::config::VideoSettings;
use rand::Rng;

/// Pan/zoom applied to a still image over the length of its clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionProfile {
    /// 1.0x to 1.3x, centered.
    ZoomIn,
    /// 1.3x to 1.0x, centered.
    ZoomOut,
    /// Fixed 1.2x, sliding left across 15% of the width.
    PanLeft,
    /// Fixed 1.2x, sliding right across 15% of the width.
    PanRight,
}

const ZOOM_SPAN: f64 = 0.3;
const ZOOM_MAX: f64 = 1.3;
const PAN_ZOOM: f64 = 1.2;
const PAN_SHIFT: f64 = 0.15;

impl MotionProfile {
    pub const ALL: [MotionProfile; 4] = [
        MotionProfile::ZoomIn,
        MotionProfile::ZoomOut,
        MotionProfile::PanLeft,
        MotionProfile::PanRight,
    ];

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn name(self) -> &'static str {
        match self {
            MotionProfile::ZoomIn => "zoom-in",
            MotionProfile::ZoomOut => "zoom-out",
            MotionProfile::PanLeft => "pan-left",
            MotionProfile::PanRight => "pan-right",
        }
    }

    /// zoompan `z`/`x`/`y` parameters as a function of the output frame index
    /// `on` over `frames`.
    pub fn zoompan_params(self, frames: u32) -> String {
        let frames = frames.max(1);
        let centered_x = "iw/2-(iw/zoom/2)";
        let centered_y = "ih/2-(ih/zoom/2)";
        match self {
            MotionProfile::ZoomIn => format!(
                "z='1+{ZOOM_SPAN}*on/{frames}':x='{centered_x}':y='{centered_y}'"
            ),
            MotionProfile::ZoomOut => format!(
                "z='{ZOOM_MAX}-{ZOOM_SPAN}*on/{frames}':x='{centered_x}':y='{centered_y}'"
            ),
            MotionProfile::PanLeft => format!(
                "z='{PAN_ZOOM}':x='(iw-iw/zoom)-iw*{PAN_SHIFT}*on/{frames}':y='{centered_y}'"
            ),
            MotionProfile::PanRight => format!(
                "z='{PAN_ZOOM}':x='iw*{PAN_SHIFT}*on/{frames}':y='{centered_y}'"
            ),
        }
    }
}

/// Frame count for a clip at the configured rate, never zero.
pub fn frame_count(duration: f64, fps: u32) -> u32 {
    ((duration.max(0.0) * fps as f64) as u32).max(1)
}

/// Upscale + sharpen, then the motion, then normalize size and pixel format.
pub fn scene_filter(profile: MotionProfile, frames: u32, video: &VideoSettings) -> String {
    format!(
        "scale={}:{}:flags=lanczos,unsharp=3:3:1.5:3:3:0.5,zoompan={}:d={}:fps={}:s={}x{},format=yuv420p",
        video.upscale_width,
        video.upscale_height,
        profile.zoompan_params(frames),
        frames,
        video.fps,
        video.width,
        video.height
    )
}
