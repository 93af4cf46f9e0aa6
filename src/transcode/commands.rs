//! Downloader and FFmpeg command builders.

use std::path::Path;

use super::tools::{ToolCommand, ToolStage};
use crate::config::WorkerConfig;

/// Everything the pipeline needs to build its tool invocations.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub downloader: String,
    pub ffmpeg: String,
    pub preset: String,
    pub extension: String,
    /// Display width. Mirrored output is encoded at half of it since stacking doubles width.
    pub display_width: u32,
    /// Display height, the cap on the short dimension.
    pub display_height: u32,
}

impl TranscodeSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            downloader: config.downloader.clone(),
            ffmpeg: config.ffmpeg.clone(),
            preset: config.ffmpeg_preset.clone(),
            extension: config.video_extension.clone(),
            display_width: config.display.width,
            display_height: config.display.height,
        }
    }

    /// Width the resize stage targets.
    pub fn target_width(&self, mirror_video: bool) -> u32 {
        if mirror_video {
            self.display_width / 2
        } else {
            self.display_width
        }
    }

    /// Downloader invocation writing `<temp_dir>/<job_id>.<ext>`.
    pub fn fetch_command(&self, url: &str, temp_dir: &Path, job_id: &str) -> ToolCommand {
        let template = temp_dir.join(format!("{}.%(ext)s", job_id));
        ToolCommand::new(ToolStage::Fetch, &self.downloader)
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("-o")
            .arg(template.to_string_lossy())
            .arg(url)
    }

    /// Stage 1: scale the longer side to the target width, capping height, keeping aspect.
    pub fn resize_command(&self, input: &Path, output: &Path, mirror_video: bool) -> ToolCommand {
        ToolCommand::new(ToolStage::Resize, &self.ffmpeg)
            .args(["-y", "-hide_banner", "-i"])
            .arg(input.to_string_lossy())
            .arg("-vf")
            .arg(resize_filter(self.target_width(mirror_video), self.display_height))
            .arg("-preset")
            .arg(&self.preset)
            .arg(output.to_string_lossy())
    }

    /// Stage 2: duplicate video and audio, optionally flip one copy, stack side by side.
    pub fn stack_command(&self, input: &Path, output: &Path, flip_video: bool) -> ToolCommand {
        ToolCommand::new(ToolStage::Stack, &self.ffmpeg)
            .args(["-y", "-hide_banner", "-i"])
            .arg(input.to_string_lossy())
            .arg("-filter_complex")
            .arg(stack_filter(flip_video))
            .args(["-map", "[v]", "-map", "[a]", "-preset"])
            .arg(&self.preset)
            .arg(output.to_string_lossy())
    }
}

/// Scale filter: landscape sources are bounded by width, portrait by height.
/// `-2` keeps the other side even and proportional.
pub fn resize_filter(width: u32, height: u32) -> String {
    format!(
        "scale=w=if(gt(iw\\,ih)\\,min({w}\\,iw)\\,-2):h=if(gt(iw\\,ih)\\,-2\\,min({h}\\,ih))",
        w = width,
        h = height
    )
}

pub fn stack_filter(flip_video: bool) -> String {
    if flip_video {
        "[0:v]split=2[v1][v2];[v2]hflip[mirrored];[0:a]asplit=2[a1][a2];\
         [v1][mirrored]hstack=inputs=2[v];[a1][a2]amerge=inputs=2[a]"
            .to_string()
    } else {
        "[0:v]split=2[v1][v2];[0:a]asplit=2[a1][a2];\
         [v1][v2]hstack=inputs=2[v];[a1][a2]amerge=inputs=2[a]"
            .to_string()
    }
}
