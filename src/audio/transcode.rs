/// Transcoder - derives lower renditions from a higher one
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::model::item::Quality;
use crate::{DepotError, Result};

/// Produces an output file for a quality rung from a source file.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path, quality: Quality) -> Result<()>;

    /// Container extension written by `transcode`.
    fn output_extension(&self) -> &str {
        "mp3"
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn build_command(&self, input: &Path, output: &Path, quality: Quality) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-i")
            .arg(input)
            .arg("-y")
            .arg("-map_metadata")
            .arg("-1")
            .arg("-vn")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match quality.target_bitrate() {
            Some(kbps) => {
                cmd.arg("-b:a").arg(format!("{kbps}k"));
            }
            // best/original pass through untouched
            None => {
                cmd.arg("-c:a").arg("copy");
            }
        }
        cmd.arg("-f").arg("mp3").arg(output);
        cmd
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path, quality: Quality) -> Result<()> {
        log::debug!(
            "Transcoding {} -> {} at {}",
            input.display(),
            output.display(),
            quality
        );
        let result = self.build_command(input, output, quality).output()?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DepotError::Transcode(format!(
                "ffmpeg failed on {}: {}",
                input.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}
